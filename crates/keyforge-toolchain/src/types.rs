//! Invocation parameters and captured results.

use keyforge_core::BuildId;

/// Named build parameters for one toolchain invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Board name (directory under `keyboards/`).
    pub board: String,

    /// Subproject / revision, may be empty.
    pub subproject: String,

    /// Keymap name, which is the build identity.
    pub keymap: BuildId,
}

impl Invocation {
    /// Create a new Invocation.
    pub fn new(board: impl Into<String>, subproject: impl Into<String>, keymap: BuildId) -> Self {
        Self {
            board: board.into(),
            subproject: subproject.into(),
            keymap,
        }
    }

    /// Parameters passed on the `make` command line.
    pub fn parameters(&self) -> Vec<String> {
        vec![
            format!("KEYBOARD={}", self.board),
            format!("SUBPROJECT={}", self.subproject),
            format!("KEYMAP={}", self.keymap),
        ]
    }
}

/// What one toolchain run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// Exit status; `-1` if the process was terminated by a signal.
    pub exit_code: i32,

    /// Program and arguments exactly as run.
    pub command: Vec<String>,

    /// Combined stdout and stderr, in arrival order.
    pub output: String,
}

impl RunOutput {
    /// Returns true if the process exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
