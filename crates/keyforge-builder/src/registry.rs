//! Immutable registry of buildable boards.
//!
//! Built once at startup by scanning the templates directory and then shared
//! read-only (behind an `Arc`) by every worker.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use keyforge_core::{assemble, BoardProperties, BoardTemplate, CoreError, LayerGrid};

/// File name of the fragment placed before the layer blocks.
pub const PROLOGUE_FILE: &str = "keymap_pre.c";

/// File name of the fragment placed after the layer blocks.
pub const EPILOGUE_FILE: &str = "keymap_post.c";

/// Errors while loading builder configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The templates directory could not be listed.
    #[error("Cannot read templates directory '{path}': {source}")]
    TemplatesDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A template file exists but could not be read.
    #[error("Cannot read template '{path}': {source}")]
    ReadTemplate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A board known to the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredBoard {
    /// Board name, matching `keyboards/<name>` in the firmware tree.
    pub name: String,

    /// Keymap fragments, if both were found.
    pub template: Option<BoardTemplate>,
}

/// Registry of boards, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct BoardRegistry {
    boards: BTreeMap<String, RegisteredBoard>,
}

impl BoardRegistry {
    /// Build a registry from already-loaded boards.
    pub fn from_boards(boards: impl IntoIterator<Item = (String, Option<BoardTemplate>)>) -> Self {
        let boards = boards
            .into_iter()
            .map(|(name, template)| (name.clone(), RegisteredBoard { name, template }))
            .collect();
        Self { boards }
    }

    /// Scan `templates_dir`: every subdirectory is a board, and its
    /// `keymap_pre.c` / `keymap_post.c` are loaded when both exist.
    pub fn scan(templates_dir: &Path) -> Result<Self, ConfigError> {
        let entries = std::fs::read_dir(templates_dir).map_err(|e| ConfigError::TemplatesDir {
            path: templates_dir.to_path_buf(),
            source: e,
        })?;

        let mut boards = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| ConfigError::TemplatesDir {
                path: templates_dir.to_path_buf(),
                source: e,
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!(path = %path.display(), "Skipping board directory with non UTF-8 name");
                continue;
            };

            let template = load_template(&path)?;
            if template.is_none() {
                warn!(board = %name, "Board has no keymap templates; builds will be rejected");
            }
            debug!(board = %name, "Registered board");

            boards.insert(
                name.to_string(),
                RegisteredBoard {
                    name: name.to_string(),
                    template,
                },
            );
        }

        info!(
            templates_dir = %templates_dir.display(),
            boards = boards.len(),
            "Board registry loaded"
        );

        Ok(Self { boards })
    }

    /// Returns true if a board is registered.
    pub fn contains(&self, board: &str) -> bool {
        self.boards.contains_key(board)
    }

    /// Registered board names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.boards.keys().map(String::as_str)
    }

    /// All registered boards, sorted by name.
    pub fn boards(&self) -> impl Iterator<Item = &RegisteredBoard> {
        self.boards.values()
    }

    /// Number of registered boards.
    pub fn len(&self) -> usize {
        self.boards.len()
    }

    /// True if no boards are registered.
    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    /// Resolve properties to a registered board name.
    pub fn resolve<'a>(&self, properties: &'a BoardProperties) -> Result<&'a str, CoreError> {
        let name = properties.board_name()?;
        if self.contains(name) {
            Ok(name)
        } else {
            Err(CoreError::UnknownBoard(name.to_string()))
        }
    }

    /// Keymap template of a registered board.
    pub fn template(&self, board: &str) -> Result<&BoardTemplate, CoreError> {
        let registered = self
            .boards
            .get(board)
            .ok_or_else(|| CoreError::UnknownBoard(board.to_string()))?;
        registered
            .template
            .as_ref()
            .ok_or_else(|| CoreError::MissingTemplate(board.to_string()))
    }

    /// Generate keymap source for a board.
    pub fn assemble(&self, board: &str, layers: &LayerGrid) -> Result<String, CoreError> {
        Ok(assemble(self.template(board)?, layers))
    }
}

fn load_template(board_dir: &Path) -> Result<Option<BoardTemplate>, ConfigError> {
    let prologue = read_optional(&board_dir.join(PROLOGUE_FILE))?;
    let epilogue = read_optional(&board_dir.join(EPILOGUE_FILE))?;
    Ok(match (prologue, epilogue) {
        (Some(prologue), Some(epilogue)) => Some(BoardTemplate::new(prologue, epilogue)),
        _ => None,
    })
}

fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::ReadTemplate {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
