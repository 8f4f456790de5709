//! Labeling run summary.

use serde::{Deserialize, Serialize};
use vault_core::TransitionRecord;

/// Counts gathered while labeling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelingSummary {
    /// Checkpoint pairs labeled.
    pub pairs: usize,
    /// Batches flushed.
    pub batches: usize,
    /// Vault transitions across all records.
    pub transitions: usize,
    /// Transitions labeled liquidated.
    pub liquidated: usize,
    /// Transitions whose vault is absent at the second checkpoint.
    pub missing_second: usize,
}

impl LabelingSummary {
    /// Account for one record.
    pub fn observe(&mut self, record: &TransitionRecord) {
        self.pairs += 1;
        self.transitions += record.per_entity.len();
        self.liquidated += record.liquidated_count();
        self.missing_second += record.per_entity.values().filter(|t| t.second.is_none()).count();
    }

    /// Share of transitions labeled liquidated.
    pub fn liquidated_frac(&self) -> f64 {
        if self.transitions > 0 {
            self.liquidated as f64 / self.transitions as f64
        } else {
            0.0
        }
    }
}
