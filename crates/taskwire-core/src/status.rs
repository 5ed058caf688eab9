//! Run status and the forward-only transition rule.

use serde::{Deserialize, Serialize};

/// Status of a Run.
///
/// Transitions only move forward: `Pending -> Running -> {Succeeded, Failed}`.
/// Once terminal, a Run is immutable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run created but not yet executing (possibly delayed or queued).
    #[default]
    Pending,
    /// Run actively executing (possibly across retry attempts).
    Running,
    /// Run completed successfully.
    Succeeded,
    /// Run failed after exhausting its attempts.
    Failed,
}

impl RunStatus {
    /// Returns true if the run is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if the run is still active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if `to` is a valid forward transition from this status.
    pub fn can_transition_to(&self, to: RunStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}
