//! rollcall-hw: V4L2 camera capture for the recognition pipeline.
//!
//! Opens a capture device, negotiates a grayscale-friendly pixel format,
//! and hands out 8-bit grayscale frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo};
pub use frame::{Frame, FrameError, PixelFormat};
