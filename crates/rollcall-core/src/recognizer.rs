//! Recognition engine: classifies face regions against a trained LBPH model
//! and applies the acceptance threshold.

use crate::lbph::{LbphModel, ModelError};
use crate::preprocess;
use crate::types::{Identity, LabelMap, Prediction};
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

/// Default acceptance cut on the LBPH distance. Lower distance = better match.
pub const ACCEPT_THRESHOLD: f64 = 50.0;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no trained model at {0}; enroll at least one person first")]
    ModelMissing(String),
    #[error("model is unreadable: {0}")]
    Corrupt(#[from] ModelError),
}

/// Debounce state for the unknown-face alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertState {
    #[default]
    Quiet,
    Alerting,
}

/// LBPH-backed recognizer holding the per-session alert state.
pub struct RecognitionEngine {
    model: LbphModel,
    threshold: f64,
    alert: AlertState,
}

impl RecognitionEngine {
    /// Load the model at `model_path`.
    ///
    /// A missing file is [`EngineError::ModelMissing`]: the caller should ask
    /// for enrollment rather than treat it as a crash.
    pub fn load(model_path: &Path, threshold: f64) -> Result<Self, EngineError> {
        if !model_path.exists() {
            return Err(EngineError::ModelMissing(model_path.display().to_string()));
        }
        let model = LbphModel::load(model_path)?;
        tracing::info!(
            path = %model_path.display(),
            entries = model.len(),
            identities = model.identifiers().len(),
            threshold,
            "loaded LBPH model"
        );
        Ok(Self::from_model(model, threshold))
    }

    pub fn from_model(model: LbphModel, threshold: f64) -> Self {
        Self {
            model,
            threshold,
            alert: AlertState::Quiet,
        }
    }

    pub fn model(&self) -> &LbphModel {
        &self.model
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn alert_state(&self) -> AlertState {
        self.alert
    }

    /// Normalize `face` the same way training did and find its nearest match.
    pub fn classify(&self, face: &GrayImage) -> Prediction {
        let normalized = preprocess::normalize_face(face);
        self.model.predict(&normalized)
    }

    /// Accept iff the distance is strictly below the threshold and the
    /// identifier has a name.
    pub fn decide(&self, prediction: &Prediction, labels: &LabelMap) -> Identity {
        decide(prediction, labels, self.threshold)
    }

    /// Reset session-scoped state.
    pub fn begin_session(&mut self) {
        self.alert = AlertState::Quiet;
    }

    /// Feed the per-frame unknown flag through the debounce state machine.
    ///
    /// Returns `true` only on the `Quiet → Alerting` edge, so one contiguous
    /// run of frames with unknown faces raises exactly one alert.
    pub fn observe_frame(&mut self, any_unknown: bool) -> bool {
        let (next, fire) = match (self.alert, any_unknown) {
            (AlertState::Quiet, true) => (AlertState::Alerting, true),
            (AlertState::Alerting, true) => (AlertState::Alerting, false),
            (_, false) => (AlertState::Quiet, false),
        };
        if next != self.alert {
            tracing::debug!(from = ?self.alert, to = ?next, "alert state changed");
        }
        self.alert = next;
        fire
    }
}

/// Threshold decision independent of any loaded model.
pub fn decide(prediction: &Prediction, labels: &LabelMap, threshold: f64) -> Identity {
    if prediction.distance >= threshold {
        return Identity::Unknown;
    }
    match prediction.identifier.and_then(|id| labels.get(id)) {
        Some(name) => Identity::Identified(name.to_string()),
        None => Identity::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lbph::LbphParams;
    use crate::trainer::tests::synthetic_face;
    use crate::types::Identifier;

    fn labels() -> LabelMap {
        let mut labels = LabelMap::default();
        labels.insert(Identifier(1), "alice");
        labels
    }

    fn prediction(id: u32, distance: f64) -> Prediction {
        Prediction { identifier: Some(Identifier(id)), distance }
    }

    #[test]
    fn test_decide_accepts_below_threshold() {
        assert_eq!(
            decide(&prediction(1, 12.5), &labels(), ACCEPT_THRESHOLD),
            Identity::Identified("alice".into())
        );
    }

    #[test]
    fn test_decide_rejects_at_and_above_threshold() {
        assert_eq!(decide(&prediction(1, 50.0), &labels(), ACCEPT_THRESHOLD), Identity::Unknown);
        assert_eq!(decide(&prediction(1, 80.0), &labels(), ACCEPT_THRESHOLD), Identity::Unknown);
    }

    #[test]
    fn test_decide_unlabeled_identifier_is_unknown() {
        assert_eq!(decide(&prediction(7, 1.0), &labels(), ACCEPT_THRESHOLD), Identity::Unknown);
        let none = Prediction { identifier: None, distance: 0.0 };
        assert_eq!(decide(&none, &labels(), ACCEPT_THRESHOLD), Identity::Unknown);
    }

    #[test]
    fn test_decide_monotonic_in_distance() {
        let labels = labels();
        let mut seen_unknown = false;
        for step in 0..=200 {
            let distance = step as f64 * 0.5;
            let identity = decide(&prediction(1, distance), &labels, ACCEPT_THRESHOLD);
            if identity.is_unknown() {
                seen_unknown = true;
            } else {
                assert!(!seen_unknown, "flipped back to identified at {distance}");
                assert!(distance < ACCEPT_THRESHOLD);
            }
        }
        assert!(seen_unknown);
    }

    #[test]
    fn test_alert_fires_once_per_unknown_run() {
        let model = LbphModel::train(LbphParams::default(), std::iter::empty());
        let mut engine = RecognitionEngine::from_model(model, ACCEPT_THRESHOLD);

        let frames = [false, true, true, true, false, false, true, false, true, true];
        let fired: Vec<bool> = frames.iter().map(|&u| engine.observe_frame(u)).collect();
        assert_eq!(
            fired,
            vec![false, true, false, false, false, false, true, false, true, false]
        );
        assert_eq!(engine.alert_state(), AlertState::Alerting);

        engine.begin_session();
        assert_eq!(engine.alert_state(), AlertState::Quiet);
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let result = RecognitionEngine::load(&dir.path().join("model.json"), ACCEPT_THRESHOLD);
        assert!(matches!(result, Err(EngineError::ModelMissing(_))));
    }

    #[test]
    fn test_load_corrupt_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, b"{").unwrap();
        assert!(matches!(
            RecognitionEngine::load(&path, ACCEPT_THRESHOLD),
            Err(EngineError::Corrupt(_))
        ));
    }

    #[test]
    fn test_classify_normalizes_unsized_input() {
        let train = preprocess::normalize_face(&synthetic_face(1, 0));
        let model = LbphModel::train(LbphParams::default(), [(Identifier(1), &train)]);
        let engine = RecognitionEngine::from_model(model, ACCEPT_THRESHOLD);

        // Exact training image: distance zero, accepted.
        let p = engine.classify(&synthetic_face(1, 0));
        assert_eq!(p.identifier, Some(Identifier(1)));
        assert!(p.distance < 1e-9);
        assert_eq!(engine.decide(&p, &labels()), Identity::Identified("alice".into()));

        // Any size is accepted; it is resized before prediction.
        let small = image::imageops::resize(&synthetic_face(1, 0), 90, 90, image::imageops::FilterType::Triangle);
        assert_eq!(engine.classify(&small).identifier, Some(Identifier(1)));
    }
}
