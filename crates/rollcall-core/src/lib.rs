//! rollcall-core: Face enrollment, LBPH training, recognition, and attendance.
//!
//! Samples live in a flat directory keyed by file name, the model is rebuilt
//! from the whole corpus after each enrollment, and recognition sessions log
//! each identified person at most once.

pub mod detector;
pub mod lbph;
pub mod ledger;
pub mod preprocess;
pub mod recognizer;
pub mod session;
pub mod store;
pub mod trainer;
pub mod types;

pub use detector::{DetectionParams, RegionDetector, ScrfdDetector};
pub use lbph::{LbphModel, LbphParams};
pub use ledger::{AttendanceLedger, AttendanceRecord, RecordOutcome};
pub use recognizer::{AlertState, EngineError, RecognitionEngine, ACCEPT_THRESHOLD};
pub use session::{
    run_enrollment, run_recognition, CancelToken, FrameSource, SessionEnd, SessionError, SessionEvents,
    SourceError, DEFAULT_SAMPLE_QUOTA,
};
pub use store::{Enrollment, SampleStore, StoreError};
pub use trainer::{TrainOutcome, TrainReport, Trainer};
pub use types::{BoundingBox, Identifier, Identity, LabelMap, Prediction, SampleMeta};
