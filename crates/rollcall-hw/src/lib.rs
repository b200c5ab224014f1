//! rollcall-hw — Hardware and media abstraction for the attendance tracker.
//!
//! Provides V4L2-based camera capture, grayscale frame operations,
//! annotation drawing, MJPEG/AVI session recording and the JPEG preview
//! sink.

pub mod annotate;
pub mod avi;
pub mod camera;
pub mod frame;
pub mod preview;

pub use avi::{AviError, MjpegAviWriter};
pub use camera::{Camera, CameraError, CameraStream, PixelFormat};
pub use frame::Frame;
pub use preview::JpegPreview;
