//! Per-build workspace directories.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use keyforge_core::{BoardProperties, BuildId, LayerGrid};

/// Generated keymap source.
pub const KEYMAP_FILE: &str = "keymap.c";

/// Submitted board properties.
pub const PROPERTIES_FILE: &str = "properties.json";

/// Submitted layer grid.
pub const LAYERS_FILE: &str = "layers.json";

/// Workspace errors.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The identity directory already exists.
    #[error("Workspace already exists: {0}")]
    Collision(PathBuf),

    /// Filesystem error.
    #[error("Workspace I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Metadata could not be serialized.
    #[error("Failed to serialize build metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The directory holding one build's generated source and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildWorkspace {
    dir: PathBuf,
    keymap: BuildId,
}

impl BuildWorkspace {
    /// Create the workspace for `keymap` under `keymaps_dir`.
    ///
    /// The identity directory is created with create-if-absent semantics;
    /// if it already exists this fails with [`WorkspaceError::Collision`].
    /// Either all three files are written or the directory is removed again.
    pub async fn create(
        keymaps_dir: &Path,
        keymap: &BuildId,
        source: &str,
        properties: &BoardProperties,
        layers: &LayerGrid,
    ) -> Result<Self, WorkspaceError> {
        let properties_json = serde_json::to_vec_pretty(properties)?;
        let layers_json = serde_json::to_vec_pretty(layers)?;

        tokio::fs::create_dir_all(keymaps_dir)
            .await
            .map_err(|e| io_error(keymaps_dir, e))?;

        let dir = keymaps_dir.join(keymap.as_str());
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(WorkspaceError::Collision(dir));
            }
            Err(e) => return Err(io_error(&dir, e)),
        }

        write_all_or_remove(
            &dir,
            &[
                (KEYMAP_FILE, source.as_bytes()),
                (PROPERTIES_FILE, properties_json.as_slice()),
                (LAYERS_FILE, layers_json.as_slice()),
            ],
        )
        .await?;

        debug!(dir = %dir.display(), "Created build workspace");

        Ok(Self {
            dir,
            keymap: keymap.clone(),
        })
    }

    /// Workspace directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Identity this workspace belongs to.
    pub fn keymap(&self) -> &BuildId {
        &self.keymap
    }

    /// Path of the generated keymap source.
    pub fn source_path(&self) -> PathBuf {
        self.dir.join(KEYMAP_FILE)
    }

    /// Delete the workspace directory and everything in it.
    pub async fn remove(self) -> Result<(), WorkspaceError> {
        tokio::fs::remove_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))
    }
}

/// Write every file into `dir`, removing `dir` if any write fails.
async fn write_all_or_remove(dir: &Path, files: &[(&str, &[u8])]) -> Result<(), WorkspaceError> {
    for (name, contents) in files {
        let path = dir.join(name);
        if let Err(e) = tokio::fs::write(&path, contents).await {
            if let Err(remove_err) = tokio::fs::remove_dir_all(dir).await {
                warn!(
                    dir = %dir.display(),
                    error = %remove_err,
                    "Failed to remove partial workspace"
                );
            }
            return Err(io_error(&path, e));
        }
    }
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> WorkspaceError {
    WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    }
}
