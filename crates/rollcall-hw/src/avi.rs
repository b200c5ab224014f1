//! MJPEG-in-AVI session recording.
//!
//! Minimal RIFF/AVI muxer: one video stream of grayscale JPEG frames
//! (`00dc` chunks), an `idx1` index, and header counts patched in by
//! [`MjpegAviWriter::finalize`]. JPEG encoding is delegated to the `image`
//! crate.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

const JPEG_QUALITY: u8 = 80;
/// AVIF_HASINDEX in the main header flags.
const AVI_FLAG_HAS_INDEX: u32 = 0x10;
/// AVIIF_KEYFRAME — every MJPEG frame is independently decodable.
const INDEX_FLAG_KEYFRAME: u32 = 0x10;

#[derive(Error, Debug)]
pub enum AviError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
    #[error("frame is {got_w}x{got_h}, recording is fixed at {want_w}x{want_h}")]
    DimensionMismatch {
        want_w: u32,
        want_h: u32,
        got_w: u32,
        got_h: u32,
    },
    #[error("writer already finalized")]
    Finalized,
}

/// Streaming MJPEG/AVI writer.
///
/// Frame geometry and rate are fixed at construction; the RIFF sizes,
/// frame counts and index are written by `finalize`, which the session
/// teardown always calls. A file dropped without finalize keeps its frame
/// chunks but has zeroed counts.
pub struct MjpegAviWriter<W: Write + Seek> {
    sink: W,
    width: u32,
    height: u32,
    frames: u32,
    max_chunk: u32,
    /// (offset from the 'movi' fourcc, chunk size) per frame, for idx1.
    index: Vec<(u32, u32)>,
    riff_size_pos: u64,
    total_frames_pos: u64,
    avih_bufsize_pos: u64,
    strh_length_pos: u64,
    strh_bufsize_pos: u64,
    movi_size_pos: u64,
    movi_fourcc_pos: u64,
    finalized: bool,
}

impl MjpegAviWriter<BufWriter<File>> {
    /// Create an AVI file at `path`.
    pub fn create(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self, AviError> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), width, height, fps)
    }
}

impl<W: Write + Seek> MjpegAviWriter<W> {
    /// Write the AVI headers (with placeholder counts) to `sink`.
    pub fn new(mut sink: W, width: u32, height: u32, fps: u32) -> Result<Self, AviError> {
        let fps = fps.max(1);

        sink.write_all(b"RIFF")?;
        let riff_size_pos = sink.stream_position()?;
        sink.write_all(&0u32.to_le_bytes())?;
        sink.write_all(b"AVI ")?;

        // hdrl list: main header + one video stream.
        sink.write_all(b"LIST")?;
        sink.write_all(&192u32.to_le_bytes())?;
        sink.write_all(b"hdrl")?;

        sink.write_all(b"avih")?;
        sink.write_all(&56u32.to_le_bytes())?;
        sink.write_all(&(1_000_000 / fps).to_le_bytes())?; // µs per frame
        sink.write_all(&0u32.to_le_bytes())?; // max bytes/sec
        sink.write_all(&0u32.to_le_bytes())?; // padding granularity
        sink.write_all(&AVI_FLAG_HAS_INDEX.to_le_bytes())?;
        let total_frames_pos = sink.stream_position()?;
        sink.write_all(&0u32.to_le_bytes())?; // total frames (patched)
        sink.write_all(&0u32.to_le_bytes())?; // initial frames
        sink.write_all(&1u32.to_le_bytes())?; // streams
        let avih_bufsize_pos = sink.stream_position()?;
        sink.write_all(&0u32.to_le_bytes())?; // suggested buffer size (patched)
        sink.write_all(&width.to_le_bytes())?;
        sink.write_all(&height.to_le_bytes())?;
        sink.write_all(&[0u8; 16])?; // reserved

        sink.write_all(b"LIST")?;
        sink.write_all(&116u32.to_le_bytes())?;
        sink.write_all(b"strl")?;

        sink.write_all(b"strh")?;
        sink.write_all(&56u32.to_le_bytes())?;
        sink.write_all(b"vids")?;
        sink.write_all(b"MJPG")?;
        sink.write_all(&0u32.to_le_bytes())?; // flags
        sink.write_all(&0u32.to_le_bytes())?; // priority + language
        sink.write_all(&0u32.to_le_bytes())?; // initial frames
        sink.write_all(&1u32.to_le_bytes())?; // scale
        sink.write_all(&fps.to_le_bytes())?; // rate
        sink.write_all(&0u32.to_le_bytes())?; // start
        let strh_length_pos = sink.stream_position()?;
        sink.write_all(&0u32.to_le_bytes())?; // length in frames (patched)
        let strh_bufsize_pos = sink.stream_position()?;
        sink.write_all(&0u32.to_le_bytes())?; // suggested buffer size (patched)
        sink.write_all(&u32::MAX.to_le_bytes())?; // quality: driver default
        sink.write_all(&0u32.to_le_bytes())?; // sample size
        sink.write_all(&0u16.to_le_bytes())?; // rcFrame left
        sink.write_all(&0u16.to_le_bytes())?; // rcFrame top
        sink.write_all(&(width as u16).to_le_bytes())?; // rcFrame right
        sink.write_all(&(height as u16).to_le_bytes())?; // rcFrame bottom

        // strf: BITMAPINFOHEADER for the decoded frames.
        sink.write_all(b"strf")?;
        sink.write_all(&40u32.to_le_bytes())?;
        sink.write_all(&40u32.to_le_bytes())?; // biSize
        sink.write_all(&(width as i32).to_le_bytes())?;
        sink.write_all(&(height as i32).to_le_bytes())?;
        sink.write_all(&1u16.to_le_bytes())?; // planes
        sink.write_all(&24u16.to_le_bytes())?; // bit count
        sink.write_all(b"MJPG")?; // compression
        sink.write_all(&(width * height * 3).to_le_bytes())?; // image size
        sink.write_all(&[0u8; 16])?; // pels/meter + palette fields

        // movi list, grown one chunk per frame.
        sink.write_all(b"LIST")?;
        let movi_size_pos = sink.stream_position()?;
        sink.write_all(&0u32.to_le_bytes())?; // (patched)
        let movi_fourcc_pos = sink.stream_position()?;
        sink.write_all(b"movi")?;

        Ok(Self {
            sink,
            width,
            height,
            frames: 0,
            max_chunk: 0,
            index: Vec::new(),
            riff_size_pos,
            total_frames_pos,
            avih_bufsize_pos,
            strh_length_pos,
            strh_bufsize_pos,
            movi_size_pos,
            movi_fourcc_pos,
            finalized: false,
        })
    }

    /// Append one grayscale frame as a JPEG chunk.
    pub fn write_frame(&mut self, data: &[u8], width: u32, height: u32) -> Result<(), AviError> {
        if self.finalized {
            return Err(AviError::Finalized);
        }
        if width != self.width || height != self.height {
            return Err(AviError::DimensionMismatch {
                want_w: self.width,
                want_h: self.height,
                got_w: width,
                got_h: height,
            });
        }

        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode(
            data,
            width,
            height,
            image::ExtendedColorType::L8,
        )?;

        let chunk_pos = self.sink.stream_position()?;
        let offset = (chunk_pos - self.movi_fourcc_pos) as u32;
        let size = jpeg.len() as u32;

        self.sink.write_all(b"00dc")?;
        self.sink.write_all(&size.to_le_bytes())?;
        self.sink.write_all(&jpeg)?;
        if size % 2 == 1 {
            self.sink.write_all(&[0u8])?; // RIFF chunks are word-aligned
        }

        self.index.push((offset, size));
        self.frames += 1;
        self.max_chunk = self.max_chunk.max(size);
        Ok(())
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Write the idx1 index and patch the header counts. Idempotent.
    pub fn finalize(&mut self) -> Result<(), AviError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let movi_end = self.sink.stream_position()?;

        self.sink.write_all(b"idx1")?;
        self.sink
            .write_all(&(self.index.len() as u32 * 16).to_le_bytes())?;
        for &(offset, size) in &self.index {
            self.sink.write_all(b"00dc")?;
            self.sink.write_all(&INDEX_FLAG_KEYFRAME.to_le_bytes())?;
            self.sink.write_all(&offset.to_le_bytes())?;
            self.sink.write_all(&size.to_le_bytes())?;
        }
        let file_end = self.sink.stream_position()?;

        let patches = [
            (self.riff_size_pos, (file_end - 8) as u32),
            (self.total_frames_pos, self.frames),
            (self.avih_bufsize_pos, self.max_chunk),
            (self.strh_length_pos, self.frames),
            (self.strh_bufsize_pos, self.max_chunk),
            (self.movi_size_pos, (movi_end - self.movi_size_pos - 4) as u32),
        ];
        for (pos, value) in patches {
            self.sink.seek(SeekFrom::Start(pos))?;
            self.sink.write_all(&value.to_le_bytes())?;
        }

        self.sink.seek(SeekFrom::Start(file_end))?;
        self.sink.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn u32_at(bytes: &[u8], pos: usize) -> u32 {
        u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap())
    }

    fn finished(frames: usize) -> Vec<u8> {
        let mut writer = MjpegAviWriter::new(Cursor::new(Vec::new()), 16, 8, 20).unwrap();
        let data = vec![128u8; 16 * 8];
        for _ in 0..frames {
            writer.write_frame(&data, 16, 8).unwrap();
        }
        writer.finalize().unwrap();
        writer.sink.into_inner()
    }

    #[test]
    fn test_header_layout() {
        let bytes = finished(0);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"AVI ");
        assert_eq!(&bytes[12..16], b"LIST");
        assert_eq!(&bytes[20..24], b"hdrl");
        assert_eq!(&bytes[24..28], b"avih");
        assert_eq!(&bytes[100..104], b"strh");
        assert_eq!(&bytes[108..112], b"vids");
        assert_eq!(&bytes[112..116], b"MJPG");
        assert_eq!(&bytes[164..168], b"strf");
        assert_eq!(&bytes[220..224], b"movi");
    }

    #[test]
    fn test_riff_size_patched() {
        let bytes = finished(2);
        assert_eq!(u32_at(&bytes, 4) as usize, bytes.len() - 8);
    }

    #[test]
    fn test_frame_counts_patched() {
        let bytes = finished(3);
        // avih dwTotalFrames and strh dwLength.
        assert_eq!(u32_at(&bytes, 48), 3);
        assert_eq!(u32_at(&bytes, 140), 3);
    }

    #[test]
    fn test_dimensions_in_headers() {
        let bytes = finished(1);
        assert_eq!(u32_at(&bytes, 64), 16); // avih width
        assert_eq!(u32_at(&bytes, 68), 8); // avih height
        assert_eq!(u32_at(&bytes, 176), 16); // strf biWidth
        assert_eq!(u32_at(&bytes, 180), 8); // strf biHeight
    }

    #[test]
    fn test_chunks_are_jpeg() {
        let bytes = finished(1);
        assert_eq!(&bytes[224..228], b"00dc");
        // JPEG SOI marker right after the chunk header.
        assert_eq!(&bytes[232..234], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_index_written() {
        let bytes = finished(2);
        let idx_pos = bytes
            .windows(4)
            .position(|w| w == b"idx1")
            .expect("idx1 present");
        assert_eq!(u32_at(&bytes, idx_pos + 4), 32); // 2 entries × 16 bytes
        assert_eq!(&bytes[idx_pos + 8..idx_pos + 12], b"00dc");
        // First chunk sits 4 bytes into the movi list data.
        assert_eq!(u32_at(&bytes, idx_pos + 16), 4);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut writer = MjpegAviWriter::new(Cursor::new(Vec::new()), 16, 8, 20).unwrap();
        let result = writer.write_frame(&vec![0u8; 8 * 4], 8, 4);
        assert!(matches!(result, Err(AviError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_write_after_finalize_rejected() {
        let mut writer = MjpegAviWriter::new(Cursor::new(Vec::new()), 16, 8, 20).unwrap();
        writer.finalize().unwrap();
        let result = writer.write_frame(&vec![0u8; 16 * 8], 16, 8);
        assert!(matches!(result, Err(AviError::Finalized)));
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut writer = MjpegAviWriter::new(Cursor::new(Vec::new()), 16, 8, 20).unwrap();
        writer.write_frame(&vec![0u8; 16 * 8], 16, 8).unwrap();
        writer.finalize().unwrap();
        writer.finalize().unwrap();
        assert_eq!(writer.frames(), 1);
    }
}
