use rollcall_core::{BoundingBox, Identity, Prediction, SampleMeta, SessionEvents};
use std::collections::HashSet;
use std::io::Write;

/// Terminal rendering for session loops.
///
/// Prints enrollment progress, the first sighting of each person, and a bell
/// on every unknown-face alert.
#[derive(Default)]
pub struct TerminalFeedback {
    seen: HashSet<String>,
}

impl SessionEvents for TerminalFeedback {
    fn on_sample_captured(&mut self, sample: &SampleMeta, quota: u32) {
        tracing::debug!(name = %sample.name, sequence = sample.sequence, "sample captured");
        println!("  captured {}/{quota}", sample.sequence);
    }

    fn on_face(&mut self, region: &BoundingBox, identity: &Identity, prediction: &Prediction) {
        tracing::debug!(
            identity = identity.display_name(),
            distance = prediction.distance,
            confidence = region.confidence,
            "face"
        );
        if let Identity::Identified(name) = identity {
            if self.seen.insert(name.clone()) {
                println!("  {name} (distance {:.1})", prediction.distance);
            }
        }
    }

    fn on_unknown_alert(&mut self) {
        print!("\x07");
        println!("  unknown face");
        let _ = std::io::stdout().flush();
    }
}
