//! Enrollment and recognition frame loops.
//!
//! Both loops are single-threaded and synchronous: pull one frame, detect
//! regions, enroll or classify each region, report feedback, then check the
//! cancel token. The capture source is owned by a [`CaptureGuard`] for the
//! whole loop, so it is released on every exit path.

use crate::detector::{DetectorError, RegionDetector};
use crate::ledger::{AttendanceLedger, LedgerError, RecordOutcome};
use crate::preprocess;
use crate::recognizer::RecognitionEngine;
use crate::store::{Enrollment, StoreError};
use crate::types::{BoundingBox, Identity, LabelMap, Prediction, SampleMeta};
use chrono::NaiveDate;
use image::GrayImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Default number of samples captured per enrollment.
pub const DEFAULT_SAMPLE_QUOTA: u32 = 20;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("cannot open capture source: {0}")]
    Open(String),
    #[error("no frame available: {0}")]
    FrameUnavailable(String),
    #[error("failed to release capture source: {0}")]
    Release(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("face detection failed: {0}")]
    Detector(#[from] DetectorError),
}

/// A camera or any other producer of grayscale frames.
pub trait FrameSource {
    /// Block until the next frame. An error ends the session loop.
    fn next_frame(&mut self) -> Result<GrayImage, SourceError>;

    /// Release the underlying handle. Called exactly once by [`CaptureGuard`].
    fn release(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Owns a [`FrameSource`] and releases it when dropped.
pub struct CaptureGuard<S: FrameSource> {
    source: S,
    released: bool,
}

impl<S: FrameSource> CaptureGuard<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            released: false,
        }
    }

    pub fn next_frame(&mut self) -> Result<GrayImage, SourceError> {
        self.source.next_frame()
    }

    /// Release now. Failures are logged, never returned: shutdown must finish.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.source.release() {
            Ok(()) => tracing::debug!("capture source released"),
            Err(err) => tracing::warn!(error = %err, "capture source release failed"),
        }
    }
}

impl<S: FrameSource> Drop for CaptureGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Cooperative stop signal, checked once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Rendering and alert hooks. All default to no-ops.
pub trait SessionEvents {
    fn on_sample_captured(&mut self, _sample: &SampleMeta, _quota: u32) {}

    fn on_face(&mut self, _region: &BoundingBox, _identity: &Identity, _prediction: &Prediction) {}

    /// Fired once at the start of each contiguous run of frames with an unknown face.
    fn on_unknown_alert(&mut self) {}

    fn on_frame_done(&mut self, _frames: u64) {}
}

/// [`SessionEvents`] that ignores everything.
pub struct NoEvents;

impl SessionEvents for NoEvents {}

/// Why a session loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    QuotaReached,
    Cancelled,
    FrameUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentReport {
    pub captured: u32,
    pub quota: u32,
    pub frames: u64,
    pub end: SessionEnd,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognitionReport {
    pub frames: u64,
    pub faces: u64,
    /// Names written to the ledger this session, in order.
    pub recorded: Vec<String>,
    pub unknown_alerts: u32,
    pub end: Option<SessionEnd>,
}

/// Capture face samples until `quota` is reached, the source runs dry, or
/// `cancel` fires.
///
/// Every detected region in a frame is appended, but never past `quota`.
/// Training must only start after this returns.
pub fn run_enrollment<S, D, E>(
    enrollment: &mut Enrollment,
    source: S,
    detector: &mut D,
    quota: u32,
    cancel: &CancelToken,
    events: &mut E,
) -> Result<EnrollmentReport, SessionError>
where
    S: FrameSource,
    D: RegionDetector + ?Sized,
    E: SessionEvents + ?Sized,
{
    let mut capture = CaptureGuard::new(source);
    let mut frames = 0u64;

    let end = loop {
        if enrollment.captured() >= quota {
            break SessionEnd::QuotaReached;
        }
        if cancel.is_cancelled() {
            break SessionEnd::Cancelled;
        }
        let frame = match capture.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::info!(error = %err, "enrollment: frame source ended");
                break SessionEnd::FrameUnavailable;
            }
        };
        frames += 1;

        for region in detector.detect(&frame)? {
            if enrollment.captured() >= quota {
                break;
            }
            let Some(face) = preprocess::crop_face(&frame, &region) else {
                continue;
            };
            let sample = enrollment.append(&face)?;
            events.on_sample_captured(&sample, quota);
        }
        events.on_frame_done(frames);
    };

    capture.release();

    let report = EnrollmentReport {
        captured: enrollment.captured(),
        quota,
        frames,
        end,
    };
    tracing::info!(
        name = enrollment.name(),
        identifier = %enrollment.identifier(),
        captured = report.captured,
        quota,
        frames,
        end = ?end,
        "enrollment finished"
    );
    Ok(report)
}

/// Classify faces frame by frame, log attendance once per name, and raise
/// one unknown-face alert per contiguous unknown run.
#[allow(clippy::too_many_arguments)]
pub fn run_recognition<S, D, E>(
    engine: &mut RecognitionEngine,
    labels: &LabelMap,
    ledger: &mut AttendanceLedger,
    date: NaiveDate,
    source: S,
    detector: &mut D,
    cancel: &CancelToken,
    events: &mut E,
) -> Result<RecognitionReport, SessionError>
where
    S: FrameSource,
    D: RegionDetector + ?Sized,
    E: SessionEvents + ?Sized,
{
    let mut capture = CaptureGuard::new(source);
    let mut report = RecognitionReport::default();
    engine.begin_session();

    let end = loop {
        if cancel.is_cancelled() {
            break SessionEnd::Cancelled;
        }
        let frame = match capture.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::info!(error = %err, "recognition: frame source ended");
                break SessionEnd::FrameUnavailable;
            }
        };
        report.frames += 1;

        let mut any_unknown = false;
        for region in detector.detect(&frame)? {
            let Some(face) = preprocess::crop_face(&frame, &region) else {
                continue;
            };
            report.faces += 1;

            let prediction = engine.classify(&face);
            let identity = engine.decide(&prediction, labels);
            tracing::trace!(?prediction, ?identity, "face classified");

            match &identity {
                Identity::Identified(name) => {
                    if ledger.record_if_absent(name, date)? == RecordOutcome::Recorded {
                        report.recorded.push(name.clone());
                    }
                }
                Identity::Unknown => any_unknown = true,
            }
            events.on_face(&region, &identity, &prediction);
        }

        if engine.observe_frame(any_unknown) {
            report.unknown_alerts += 1;
            tracing::info!(frame = report.frames, "unknown face present");
            events.on_unknown_alert();
        }
        events.on_frame_done(report.frames);
    };

    capture.release();
    report.end = Some(end);
    tracing::info!(
        frames = report.frames,
        faces = report.faces,
        recorded = report.recorded.len(),
        unknown_alerts = report.unknown_alerts,
        end = ?end,
        "recognition finished"
    );
    Ok(report)
}
