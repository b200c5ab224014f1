//! Frame type and pixel operations — YUYV conversion and downscaling.

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Driver sequence number of the capture buffer.
    pub sequence: u32,
}

impl Frame {
    /// Downscale by an integer factor using box averaging.
    ///
    /// Detection and encoding run on the smaller frame; region coordinates
    /// are mapped back to full resolution by the caller. A factor of 0 or 1
    /// returns an unscaled clone.
    pub fn downscale(&self, factor: u32) -> Frame {
        if factor <= 1 {
            return self.clone();
        }

        let f = factor as usize;
        let src_w = self.width as usize;
        let out_w = src_w / f;
        let out_h = self.height as usize / f;
        let mut data = vec![0u8; out_w * out_h];

        for oy in 0..out_h {
            for ox in 0..out_w {
                let mut sum = 0u32;
                for dy in 0..f {
                    for dx in 0..f {
                        sum += self.data[(oy * f + dy) * src_w + ox * f + dx] as u32;
                    }
                }
                data[oy * out_w + ox] = (sum / (f * f) as u32) as u8;
            }
        }

        Frame {
            data,
            width: out_w as u32,
            height: out_h as u32,
            sequence: self.sequence,
        }
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
