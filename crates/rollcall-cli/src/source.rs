use image::GrayImage;
use rollcall_core::{FrameSource, SourceError};
use rollcall_hw::{Camera, Frame};

/// [`FrameSource`] over a V4L2 camera. `release` closes the device.
pub struct CameraSource {
    camera: Option<Camera>,
}

impl CameraSource {
    /// Open `device` and discard `warmup` frames.
    pub fn open(device: &str, width: u32, height: u32, warmup: usize) -> Result<Self, SourceError> {
        let mut camera = Camera::open(device, width, height).map_err(|e| SourceError::Open(e.to_string()))?;
        if camera.resolution() != (width, height) {
            let (got_width, got_height) = camera.resolution();
            tracing::warn!(
                requested = %format!("{width}x{height}"),
                negotiated = %format!("{got_width}x{got_height}"),
                "camera chose a different resolution"
            );
        }
        camera.warm_up(warmup);
        Ok(Self { camera: Some(camera) })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<GrayImage, SourceError> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| SourceError::FrameUnavailable("camera already released".to_string()))?;
        let frame = camera
            .capture_frame()
            .map_err(|e| SourceError::FrameUnavailable(e.to_string()))?;
        if frame.is_dark {
            tracing::debug!(sequence = frame.sequence, brightness = frame.avg_brightness(), "dark frame");
        }
        to_gray_image(frame)
    }

    fn release(&mut self) -> Result<(), SourceError> {
        if let Some(camera) = self.camera.take() {
            tracing::debug!(device = camera.device_path(), "releasing camera");
            camera.close();
        }
        Ok(())
    }
}

fn to_gray_image(frame: Frame) -> Result<GrayImage, SourceError> {
    let (width, height, data) = frame.into_parts();
    GrayImage::from_raw(width, height, data)
        .ok_or_else(|| SourceError::FrameUnavailable(format!("frame buffer does not match {width}x{height}")))
}
