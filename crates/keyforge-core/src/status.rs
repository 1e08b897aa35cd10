//! Lifecycle states of a BuildJob.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CoreError;

/// State of a BuildJob.
///
/// `Queued -> Running -> {Succeeded, ToolchainFailed, ValidationFailed}
/// -> CleanupScheduled -> CleanupDone`. Callers only ever wait for one of
/// the three build outcomes; the cleanup states are internal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Job accepted but not yet picked up by a worker.
    #[default]
    Queued,
    /// A worker is executing the build.
    Running,
    /// Firmware built and the artifact was captured.
    Succeeded,
    /// The toolchain failed, or exited 0 without producing the artifact.
    ToolchainFailed,
    /// The job was rejected before any toolchain invocation.
    ValidationFailed,
    /// Result recorded, toolchain clean step pending.
    CleanupScheduled,
    /// Clean step finished (successfully or not).
    CleanupDone,
}

impl JobState {
    /// Returns true once a BuildResult has been recorded.
    pub fn has_result(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }

    /// Returns true for the three build outcome states.
    pub fn is_outcome(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::ToolchainFailed | Self::ValidationFailed
        )
    }

    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (Self::Queued, Self::Running) => true,
            (Self::Running, next) if next.is_outcome() => true,
            (state, Self::CleanupScheduled) if state.is_outcome() => true,
            (Self::CleanupScheduled, Self::CleanupDone) => true,
            _ => false,
        }
    }

    /// Validate a transition, returning the new state.
    pub fn transition(self, next: JobState) -> Result<JobState, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::ToolchainFailed => "toolchain_failed",
            Self::ValidationFailed => "validation_failed",
            Self::CleanupScheduled => "cleanup_scheduled",
            Self::CleanupDone => "cleanup_done",
        };
        f.write_str(name)
    }
}
