//! Layout of a firmware checkout.

use std::path::{Path, PathBuf};

use keyforge_core::BuildId;

use crate::types::Invocation;

/// Paths inside the firmware checkout the toolchain builds in.
///
/// ```text
/// <root>/keyboards/<board>/                       board sources
/// <root>/keyboards/<board>/keymaps/<keymap>/      one build workspace
/// <root>/<board>_<subproject>_<keymap>.hex        built firmware
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareTree {
    root: PathBuf,
}

impl FirmwareTree {
    /// Create a new FirmwareTree rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root of the checkout; the toolchain runs here.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every board.
    pub fn keyboards_dir(&self) -> PathBuf {
        self.root.join("keyboards")
    }

    /// Source directory of one board.
    pub fn board_dir(&self, board: &str) -> PathBuf {
        self.keyboards_dir().join(board)
    }

    /// True if the firmware checkout contains this board.
    pub fn has_board(&self, board: &str) -> bool {
        self.board_dir(board).is_dir()
    }

    /// Namespace that build workspaces for a board are created in.
    pub fn keymaps_dir(&self, board: &str) -> PathBuf {
        self.board_dir(board).join("keymaps")
    }

    /// Workspace directory for one build identity.
    pub fn workspace_dir(&self, board: &str, keymap: &BuildId) -> PathBuf {
        self.keymaps_dir(board).join(keymap.as_str())
    }

    /// File name of the firmware an invocation produces.
    pub fn artifact_name(&self, invocation: &Invocation) -> String {
        if invocation.subproject.is_empty() {
            format!("{}_{}.hex", invocation.board, invocation.keymap)
        } else {
            format!(
                "{}_{}_{}.hex",
                invocation.board, invocation.subproject, invocation.keymap
            )
        }
    }

    /// Where the firmware an invocation produces is expected to appear.
    pub fn artifact_path(&self, invocation: &Invocation) -> PathBuf {
        self.root.join(self.artifact_name(invocation))
    }
}
