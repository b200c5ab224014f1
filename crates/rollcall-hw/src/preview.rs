//! JPEG preview sink — the headless live display.
//!
//! Writes the latest annotated frame to a fixed path via a temp file and
//! atomic rename, so a file browser or `feh --reload` always sees a
//! complete image. Preview failures are never fatal to the session; the
//! first one logs a warning and the rest stay quiet.

use crate::frame::Frame;
use std::path::PathBuf;

const PREVIEW_JPEG_QUALITY: u8 = 70;

pub struct JpegPreview {
    path: PathBuf,
    tmp_path: PathBuf,
    warned: bool,
}

impl JpegPreview {
    pub fn new(path: PathBuf) -> Self {
        let tmp_path = path.with_extension("jpg.tmp");
        Self {
            path,
            tmp_path,
            warned: false,
        }
    }

    /// Publish a frame. Fire-and-forget: errors are swallowed after a
    /// single warning.
    pub fn show(&mut self, frame: &Frame) {
        if let Err(err) = self.try_show(frame) {
            if !self.warned {
                tracing::warn!(path = %self.path.display(), error = %err, "preview write failed; continuing without preview");
                self.warned = true;
            }
        }
    }

    fn try_show(&self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>> {
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, PREVIEW_JPEG_QUALITY)
            .encode(
                &frame.data,
                frame.width,
                frame.height,
                image::ExtendedColorType::L8,
            )?;

        std::fs::write(&self.tmp_path, &jpeg)?;
        std::fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_writes_jpeg_atomically() {
        let dir = std::env::temp_dir().join(format!("rollcall-preview-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("preview.jpg");

        let frame = Frame {
            data: vec![90u8; 32 * 16],
            width: 32,
            height: 16,
            sequence: 0,
        };

        let mut preview = JpegPreview::new(path.clone());
        preview.show(&frame);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..2], &[0xFF, 0xD8]);
        // The temp file must not linger after the rename.
        assert!(!path.with_extension("jpg.tmp").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_show_failure_is_swallowed() {
        let frame = Frame {
            data: vec![0u8; 4],
            width: 2,
            height: 2,
            sequence: 0,
        };
        // Unwritable destination: show() must not panic or error out.
        let mut preview = JpegPreview::new(PathBuf::from("/nonexistent-dir/preview.jpg"));
        preview.show(&frame);
        preview.show(&frame);
    }
}
