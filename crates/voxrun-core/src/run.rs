//! Run state machine

use serde::{Deserialize, Serialize};

/// Lifecycle of a single run on a job runner
///
/// `Idle -> Staging -> Running -> DrainingOutput -> Completed`, with `Aborted`
/// and `Failed` reachable from any active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No run has been started
    #[default]
    Idle,
    /// Checking the runtime, the image, and writing inputs
    Staging,
    /// Container is running and streaming output
    Running,
    /// Container exited, outputs are being read back
    DrainingOutput,
    /// Outputs were materialized
    Completed,
    /// Cancelled by the caller
    Aborted,
    /// Run failed
    Failed,
}

impl RunState {
    /// A run is in flight and owns the staging directories
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RunState::Staging | RunState::Running | RunState::DrainingOutput
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Aborted | RunState::Failed
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Staging => write!(f, "Staging"),
            RunState::Running => write!(f, "Running"),
            RunState::DrainingOutput => write!(f, "DrainingOutput"),
            RunState::Completed => write!(f, "Completed"),
            RunState::Aborted => write!(f, "Aborted"),
            RunState::Failed => write!(f, "Failed"),
        }
    }
}
