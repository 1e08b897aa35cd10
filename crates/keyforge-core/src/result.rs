//! Classified outcome of one build.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::JobState;

/// Why a job was rejected before reaching the toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    /// Board path is malformed or names no registered board.
    UnknownBoard,
    /// Every identity tried was already occupied.
    IdentityCollision,
    /// The board has no keymap prologue/epilogue templates.
    MissingTemplate,
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::UnknownBoard => "unknown board",
            Self::IdentityCollision => "identity collision",
            Self::MissingTemplate => "missing keymap template",
        };
        f.write_str(text)
    }
}

/// A toolchain invocation that did not produce firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainFailure {
    /// Exit status, `-1` if the process could not be run or was signalled.
    pub exit_code: i32,

    /// The exact command line that was run.
    pub command: Vec<String>,

    /// Combined stdout and stderr, in arrival order.
    pub output: String,

    /// Expected artifact path when the toolchain exited 0 without it.
    pub missing_artifact: Option<PathBuf>,
}

impl ToolchainFailure {
    /// True when the toolchain reported success but left no artifact.
    pub fn is_anomalous_success(&self) -> bool {
        self.exit_code == 0 && self.missing_artifact.is_some()
    }
}

/// Result of a BuildJob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildResult {
    /// Firmware was built; the artifact bytes were captured before cleanup.
    Success {
        /// Firmware image bytes.
        artifact: Vec<u8>,
        /// File name of the artifact in the firmware tree.
        file_name: String,
        /// Combined toolchain output.
        output: String,
    },

    /// The toolchain ran and failed.
    ToolchainFailure(ToolchainFailure),

    /// The job was rejected before any workspace or subprocess existed.
    ValidationFailure {
        /// Reason for rejection.
        reason: ValidationReason,
    },
}

impl BuildResult {
    /// Create a validation failure.
    pub fn validation(reason: ValidationReason) -> Self {
        Self::ValidationFailure { reason }
    }

    /// Returns true if firmware was produced.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The job state this result puts the job into.
    pub fn state(&self) -> JobState {
        match self {
            Self::Success { .. } => JobState::Succeeded,
            Self::ToolchainFailure(_) => JobState::ToolchainFailed,
            Self::ValidationFailure { .. } => JobState::ValidationFailed,
        }
    }

    /// Combined toolchain output, if the toolchain ran.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Success { output, .. } => Some(output),
            Self::ToolchainFailure(failure) => Some(&failure.output),
            Self::ValidationFailure { .. } => None,
        }
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success {
                artifact,
                file_name,
                ..
            } => write!(f, "built {} ({} bytes)", file_name, artifact.len()),
            Self::ToolchainFailure(failure) if failure.is_anomalous_success() => write!(
                f,
                "toolchain exited 0 but produced no artifact at {}",
                failure
                    .missing_artifact
                    .as_deref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            ),
            Self::ToolchainFailure(failure) => {
                write!(f, "could not build firmware (return code: {})", failure.exit_code)
            }
            Self::ValidationFailure { reason } => write!(f, "rejected: {}", reason),
        }
    }
}
