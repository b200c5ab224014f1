//! rollcall-core — Face detection, embedding and roster matching.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime for CPU inference. The [`FaceEngine`] trait is
//! the seam between the recognition models and the attendance loop, so the
//! loop can be driven by deterministic fakes in tests.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod engine;
pub mod roster;
pub mod types;

pub use engine::{EngineError, FaceEngine, OnnxEngine};
pub use roster::{EnrolledFace, Roster};
pub use types::{Descriptor, MatchResult, Matcher, NearestMatcher, Region};

use std::path::PathBuf;

/// Default directory for ONNX model files.
///
/// `$XDG_DATA_HOME/rollcall/models`, falling back to
/// `~/.local/share/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}
