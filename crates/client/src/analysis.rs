//! Analysis-notification state machine
//!
//! Tracks whether the agent is analysing a dimension and whether the user is
//! looking at the resulting partial feedback. Pure and synchronous: the
//! session actor owns the timer and executes the returned effects.

use assessment_protocol::agent::AnalysisStatus;
use assessment_protocol::{AnalysisNotification, Dimension, DimensionState};

pub const DEFAULT_ANALYSIS_TIMEOUT_MS: u64 = 15_000;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisPhase {
    #[default]
    Idle,
    Waiting {
        dimension: Dimension,
    },
    Viewing {
        dimension: Dimension,
    },
}

impl AnalysisPhase {
    pub fn is_waiting(&self) -> bool {
        matches!(self, AnalysisPhase::Waiting { .. })
    }

    /// Dimension whose partial feedback should be on screen.
    pub fn viewing(&self) -> Option<Dimension> {
        match self {
            AnalysisPhase::Viewing { dimension } => Some(*dimension),
            _ => None,
        }
    }
}

/// Phase plus the generation of the timer armed for it.
///
/// Every transition out of `Waiting` bumps the generation, so a timer that
/// fires late carries a stale token and is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnalysisState {
    pub phase: AnalysisPhase,
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// Input / context / effects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisInput {
    Notification(AnalysisNotification),
    /// A dimension snapshot was applied to the store.
    StateApplied,
    TimerElapsed {
        generation: u64,
    },
    /// User dismissed the partial feedback view.
    Continue,
    Reset,
}

/// Read-only view of the store the machine consults.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisContext<'a> {
    pub completed: bool,
    pub dimension_state: Option<&'a DimensionState>,
}

impl AnalysisContext<'_> {
    fn has_feedback_for(&self, dimension: Dimension) -> bool {
        self.dimension_state
            .is_some_and(|state| state.has_feedback_for(dimension))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisEffect {
    StartTimer { generation: u64, dimension: Dimension },
    CancelTimer,
    /// Analysis never produced feedback. Soft failure, logged only.
    TimedOut { dimension: Dimension },
}

// ---------------------------------------------------------------------------
// transition()
// ---------------------------------------------------------------------------

pub fn transition(
    mut state: AnalysisState,
    input: AnalysisInput,
    ctx: AnalysisContext<'_>,
) -> (AnalysisState, Vec<AnalysisEffect>) {
    let mut effects = Vec::new();

    match (state.phase, input) {
        (AnalysisPhase::Idle, AnalysisInput::Notification(n))
            if n.status == AnalysisStatus::Started && !ctx.completed =>
        {
            state.generation += 1;
            state.phase = AnalysisPhase::Waiting {
                dimension: n.dimension,
            };
            effects.push(AnalysisEffect::StartTimer {
                generation: state.generation,
                dimension: n.dimension,
            });
        }

        (AnalysisPhase::Waiting { .. }, AnalysisInput::Notification(n))
            if n.status == AnalysisStatus::Completed =>
        {
            state.generation += 1;
            state.phase = AnalysisPhase::Idle;
            effects.push(AnalysisEffect::CancelTimer);
        }

        (AnalysisPhase::Waiting { dimension }, AnalysisInput::StateApplied)
            if ctx.has_feedback_for(dimension) =>
        {
            state.generation += 1;
            state.phase = AnalysisPhase::Viewing { dimension };
            effects.push(AnalysisEffect::CancelTimer);
        }

        (AnalysisPhase::Waiting { dimension }, AnalysisInput::TimerElapsed { generation })
            if generation == state.generation =>
        {
            state.generation += 1;
            state.phase = AnalysisPhase::Idle;
            effects.push(AnalysisEffect::TimedOut { dimension });
        }

        (AnalysisPhase::Viewing { .. }, AnalysisInput::Continue) => {
            state.phase = AnalysisPhase::Idle;
        }

        (phase, AnalysisInput::Reset) => {
            if phase.is_waiting() {
                effects.push(AnalysisEffect::CancelTimer);
            }
            state.generation += 1;
            state.phase = AnalysisPhase::Idle;
        }

        // Duplicate starts, stale timers, and feedback for other dimensions
        _ => {}
    }

    (state, effects)
}
