//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, PixelFormat};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::{Capabilities, Flags};
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Fraction of near-black pixels above which a frame is flagged dark.
const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// Highest `/dev/videoN` index probed by [`Camera::list_devices`].
const MAX_DEVICE_INDEX: u32 = 16;

const STREAM_BUFFERS: u32 = 4;

/// Longest wait for one dequeued buffer before the capture is reported failed.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no camera at {0}")]
    NotFound(String),
    #[error("camera {0} is in use by another process")]
    Busy(String),
    #[error("{0} is not a video capture device")]
    NotCaptureDevice(String),
    #[error("cannot agree on a pixel format with {device}: {reason}")]
    Format { device: String, reason: String },
    #[error("capture failed: {0}")]
    Capture(String),
}

/// A V4L2 capture device found by [`Camera::list_devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// An open V4L2 capture device. The device is closed when the handle drops.
pub struct Camera {
    /// Started on the first capture and kept until the camera is dropped.
    stream: Option<MmapStream<'static>>,
    device: Device,
    device_path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

/// Open `path` and confirm it can capture video.
fn open_capture_device(path: &str) -> Result<(Device, Capabilities), CameraError> {
    if !Path::new(path).exists() {
        return Err(CameraError::NotFound(path.to_string()));
    }
    let device = Device::with_path(path).map_err(|e| match e.raw_os_error() {
        Some(16) => CameraError::Busy(path.to_string()),
        _ => CameraError::NotFound(format!("{path}: {e}")),
    })?;
    let caps = device
        .query_caps()
        .map_err(|e| CameraError::Capture(format!("{path}: query capabilities: {e}")))?;
    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        return Err(CameraError::NotCaptureDevice(path.to_string()));
    }
    Ok((device, caps))
}

fn start_stream(device: &Device) -> Result<MmapStream<'static>, CameraError> {
    let mut stream = MmapStream::with_buffers(device, BufType::VideoCapture, STREAM_BUFFERS)
        .map_err(|e| CameraError::Capture(format!("mmap stream: {e}")))?;
    stream.set_timeout(DEQUEUE_TIMEOUT);
    Ok(stream)
}

impl Camera {
    /// Open `device_path` (e.g. "/dev/video0") and ask for `width` x `height` YUYV.
    ///
    /// Drivers may answer with another size or with GREY/Y16; whatever they
    /// settle on is what [`Camera::capture_frame`] returns.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        let (device, caps) = open_capture_device(device_path)?;
        let format_error = |reason: String| CameraError::Format {
            device: device_path.to_string(),
            reason,
        };

        let mut requested = device.format().map_err(|e| format_error(e.to_string()))?;
        requested.fourcc = FourCC::new(b"YUYV");
        requested.width = width;
        requested.height = height;
        let negotiated = device
            .set_format(&requested)
            .map_err(|e| format_error(e.to_string()))?;

        let pixel_format = PixelFormat::from_fourcc(&negotiated.fourcc.repr)
            .ok_or_else(|| format_error(format!("unsupported {:?}, need YUYV, GREY or Y16", negotiated.fourcc)))?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            ?pixel_format,
            "camera opened"
        );

        Ok(Self {
            stream: None,
            device,
            device_path: device_path.to_string(),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Negotiated `(width, height)`.
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Capture one frame as 8-bit grayscale.
    ///
    /// Streaming starts on the first call and stays on, so a live loop pays
    /// for STREAMON once. A failed dequeue stops the stream; the next call
    /// starts a fresh one.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            self.stream = Some(start_stream(&self.device)?);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::Capture("stream not started".to_string()));
        };

        let (pixel_format, width, height) = (self.pixel_format, self.width, self.height);
        let dequeued = stream
            .next()
            .map(|(buf, meta)| (frame::decode_grayscale(pixel_format, buf, width, height), meta.sequence));
        let (decoded, sequence) = match dequeued {
            Ok(dequeued) => dequeued,
            Err(e) => {
                self.stream = None;
                return Err(CameraError::Capture(format!("dequeue buffer: {e}")));
            }
        };
        let data = decoded.map_err(|e| CameraError::Capture(e.to_string()))?;
        let is_dark = frame::is_dark_frame(&data, DARK_FRAME_THRESHOLD);

        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            sequence,
            is_dark,
        })
    }

    /// Capture and drop `count` frames while auto-exposure settles.
    pub fn warm_up(&mut self, count: usize) {
        for n in 0..count {
            if let Err(e) = self.capture_frame() {
                tracing::debug!(frame = n, error = %e, "warmup capture failed");
            }
        }
    }

    pub fn close(mut self) {
        // Stop streaming before the device handle goes away.
        self.stream = None;
        tracing::info!(device = %self.device_path, "camera closed");
    }

    /// Probe `/dev/video0` through `/dev/video15` for capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_DEVICE_INDEX)
            .map(|i| format!("/dev/video{i}"))
            .filter_map(|path| {
                let (_, caps) = open_capture_device(&path).ok()?;
                Some(DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}
