use crate::detector::{DetectorError, FaceDetector};
use crate::encoder::{EncoderError, FaceEncoder};
use crate::types::{Descriptor, Region};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
}

/// Face analysis capability consumed by enrollment and the session loop.
///
/// `detect` returns face regions sorted by confidence; `encode` returns one
/// descriptor per region, pairwise aligned by index. Both take raw
/// grayscale pixels so callers are not tied to any frame type.
pub trait FaceEngine {
    fn detect(&mut self, frame: &[u8], width: u32, height: u32)
        -> Result<Vec<Region>, EngineError>;

    fn encode(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        regions: &[Region],
    ) -> Result<Vec<Descriptor>, EngineError>;
}

/// Production engine: SCRFD detection + ArcFace embedding via ONNX Runtime.
pub struct OnnxEngine {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxEngine {
    /// Load both models, failing fast if either file is missing or invalid.
    pub fn load(detector_path: &str, encoder_path: &str) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(detector_path)?;
        tracing::info!(path = detector_path, "SCRFD detector loaded");

        let encoder = FaceEncoder::load(encoder_path)?;
        tracing::info!(path = encoder_path, "ArcFace encoder loaded");

        Ok(Self { detector, encoder })
    }
}

impl FaceEngine for OnnxEngine {
    fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Region>, EngineError> {
        Ok(self.detector.detect(frame, width, height)?)
    }

    fn encode(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        regions: &[Region],
    ) -> Result<Vec<Descriptor>, EngineError> {
        let mut descriptors = Vec::with_capacity(regions.len());
        for region in regions {
            descriptors.push(self.encoder.extract(frame, width, height, region)?);
        }
        Ok(descriptors)
    }
}
