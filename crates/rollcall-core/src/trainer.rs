//! Rebuilds the LBPH model from the full sample corpus.

use crate::lbph::{LbphModel, LbphParams, ModelError};
use crate::preprocess;
use crate::store::{SampleStore, StoreError};
use crate::types::Identifier;
use image::GrayImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("cannot list samples: {0}")]
    Store(#[from] StoreError),
    #[error("cannot write model: {0}")]
    Model(#[from] ModelError),
}

/// Counts gathered during one rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrainReport {
    pub samples: usize,
    pub identities: usize,
    /// Files skipped because their name or pixels could not be read.
    pub skipped: usize,
}

/// Outcome of a rebuild. `Empty` is the expected state before any enrollment.
#[derive(Debug)]
pub enum TrainOutcome {
    Trained { model: LbphModel, report: TrainReport },
    Empty { skipped: usize },
}

pub struct Trainer {
    params: LbphParams,
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new(LbphParams::default())
    }
}

impl Trainer {
    pub fn new(params: LbphParams) -> Self {
        Self { params }
    }

    /// Train a model from every readable sample in `store`.
    ///
    /// Unreadable samples are logged and skipped. Must not run while an
    /// enrollment is still writing into the same store.
    pub fn rebuild(&self, store: &SampleStore) -> Result<TrainOutcome, TrainError> {
        let listing = store.list_all()?;
        let mut skipped = listing.skipped;
        let mut faces: Vec<(Identifier, GrayImage)> = Vec::with_capacity(listing.samples.len());

        for record in &listing.samples {
            match store.load_sample(record) {
                Ok(img) => faces.push((record.meta.identifier, preprocess::normalize_face(&img))),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable sample");
                    skipped += 1;
                }
            }
        }

        if faces.is_empty() {
            tracing::info!(skipped, "no usable samples; nothing to train");
            return Ok(TrainOutcome::Empty { skipped });
        }

        let model = LbphModel::train(self.params, faces.iter().map(|(id, img)| (*id, img)));
        let report = TrainReport {
            samples: model.len(),
            identities: model.identifiers().len(),
            skipped,
        };
        tracing::info!(
            samples = report.samples,
            identities = report.identities,
            skipped = report.skipped,
            "model trained"
        );

        Ok(TrainOutcome::Trained { model, report })
    }

    /// Rebuild and persist to `model_path`.
    ///
    /// On `Empty` the previous model file, if any, is left untouched.
    pub fn rebuild_to(&self, store: &SampleStore, model_path: &Path) -> Result<TrainOutcome, TrainError> {
        let outcome = self.rebuild(store)?;
        if let TrainOutcome::Trained { model, .. } = &outcome {
            model.save(model_path)?;
        }
        Ok(outcome)
    }
}
