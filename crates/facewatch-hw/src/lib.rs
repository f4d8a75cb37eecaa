//! facewatch-hw: frame capture for the recognition pipeline.
//!
//! Provides V4L2-based webcam access, a still-image sequence source for
//! offline runs, and the RGB frame type both produce.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::{open_source, FrameSource, ImageSequence};
