//! Error types for toolchain invocation.

use thiserror::Error;

/// Errors that can occur while running the toolchain.
///
/// A toolchain that runs and exits nonzero is not an error here; it is a
/// [`RunOutput`](crate::RunOutput) with a nonzero exit code.
#[derive(Debug, Error)]
pub enum ToolchainError {
    /// Failed to spawn the toolchain process.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error while waiting on the process.
    #[error("Toolchain I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A standard stream was not captured.
    #[error("Failed to capture toolchain {0}")]
    Pipe(&'static str),
}
