//! Phases of a single run of the iteration state machine.

use std::fmt;

/// Phase of one run.
///
/// ```text
/// Starting -> Running -> Checkpointing -> Stopped
///                     \-> Finished       \-> Failed
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RunPhase {
    /// Run state received, sequence not built yet.
    #[default]
    Starting,
    /// Pulling and processing items.
    Running,
    /// Policy asked to stop; cursor is being validated.
    Checkpointing,
    /// Cursor persisted, a resubmission was emitted.
    Stopped,
    /// Sequence exhausted. No resubmission.
    Finished,
    /// Run aborted with an error. No resubmission.
    Failed,
}

impl RunPhase {
    /// Returns true if the run cannot make further progress.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Finished | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Checkpointing => "checkpointing",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
