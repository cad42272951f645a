//! Read-only views derived from the dimension state for display.

use serde::Serialize;

use assessment_protocol::{Dimension, DimensionState};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    /// Dimensions already behind the current stage.
    pub current_index: usize,
    pub total: usize,
    pub remaining: usize,
    pub completed: bool,
}

impl Progress {
    pub fn from_state(state: Option<&DimensionState>, completed: bool) -> Self {
        let total = Dimension::ALL.len();
        let current_index = state
            .and_then(|s| s.current)
            .map(|stage| stage.progress_index())
            .unwrap_or(0)
            .min(total);
        Self {
            current_index,
            total,
            remaining: total - current_index,
            completed,
        }
    }

    pub fn fraction(&self) -> f64 {
        self.current_index as f64 / self.total as f64
    }
}

/// Score per dimension in assessment order. Unscored shows as 0.
pub fn chart_scores(state: Option<&DimensionState>) -> Vec<(Dimension, f64)> {
    Dimension::ALL
        .iter()
        .map(|dimension| {
            let score = state
                .and_then(|s| s.record(*dimension))
                .and_then(|record| record.scoring)
                .unwrap_or(0.0);
            (*dimension, score)
        })
        .collect()
}
