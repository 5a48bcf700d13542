//! facematch-hw: frame sources for the recognition pipeline.
//!
//! Provides V4L2 camera capture with RGB conversion, plus a still-image
//! source used for file-based enrollment and testing.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat, V4lCameraOpener};
pub use frame::Frame;
pub use source::{CameraOpener, FrameSource, ImageFileOpener, ImageFileSource};
