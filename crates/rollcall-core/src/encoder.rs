//! ArcFace face encoder via ONNX Runtime.
//!
//! Maps a detected face region to a 512-dimensional L2-normalized
//! descriptor, after aligning the face to the canonical 112×112 crop.

use crate::alignment;
use crate::types::{Descriptor, Region};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ENC_INPUT_SIZE: usize = 112;
const ENC_PIXEL_MEAN: f32 = 127.5;
const ENC_PIXEL_STD: f32 = 127.5; // symmetric normalization, unlike SCRFD
const DESCRIPTOR_DIM: usize = 512;
const ENC_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("region has no landmarks — the detector must supply landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face encoder.
pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EncoderError> {
        if !Path::new(model_path).exists() {
            return Err(EncoderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Extract a descriptor for one detected region of a grayscale frame.
    ///
    /// The region must carry landmarks; the face is warped to the canonical
    /// 112×112 position before the embedding is computed.
    pub fn extract(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
        region: &Region,
    ) -> Result<Descriptor, EncoderError> {
        let landmarks = region.landmarks.as_ref().ok_or(EncoderError::NoLandmarks)?;

        let aligned = alignment::align_face(frame, width, height, landmarks);
        let input = Self::preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != DESCRIPTOR_DIM {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        // L2-normalize so Euclidean distances are comparable across frames.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw.to_vec()
        };

        Ok(Descriptor {
            values,
            model_version: Some(ENC_MODEL_VERSION.to_string()),
        })
    }

    /// Preprocess a 112×112 grayscale aligned crop into a NCHW float tensor.
    fn preprocess(aligned: &[u8]) -> Array4<f32> {
        let size = ENC_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                let pixel = aligned.get(y * size + x).copied().unwrap_or(0) as f32;
                let normalized = (pixel - ENC_PIXEL_MEAN) / ENC_PIXEL_STD;
                // Gray replicated across R, G, B.
                tensor[[0, 0, y, x]] = normalized;
                tensor[[0, 1, y, x]] = normalized;
                tensor[[0, 2, y, x]] = normalized;
            }
        }

        tensor
    }
}
