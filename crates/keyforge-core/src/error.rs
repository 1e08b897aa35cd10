//! Core domain errors.

use thiserror::Error;

/// Core domain errors for Keyforge.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Board path does not name a registered board, or is malformed.
    #[error("Unknown board: {0}")]
    UnknownBoard(String),

    /// Board has no keymap prologue/epilogue templates.
    #[error("Missing keymap template for board '{0}'")]
    MissingTemplate(String),

    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
