//! Board properties and keymap templates.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::CoreError;

/// Properties describing which board and subproject a build targets.
///
/// Uploaded layouts carry extra display keys (name, key width, ...) next to
/// the board path. They are kept in `extra` so the persisted
/// `properties.json` matches what the caller sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardProperties {
    /// Keyboard identifier path, e.g. `keyboards/clueboard`.
    #[serde(rename = "directory", alias = "boardPath", alias = "board_path")]
    pub board_path: String,

    /// Hardware revision / subproject passed to the toolchain.
    #[serde(default)]
    pub subproject: String,

    /// Any other keys present in the submitted properties.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BoardProperties {
    /// Create new properties with no extra keys.
    pub fn new(board_path: impl Into<String>, subproject: impl Into<String>) -> Self {
        Self {
            board_path: board_path.into(),
            subproject: subproject.into(),
            extra: Map::new(),
        }
    }

    /// Builder method to add an extra key.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// The board name: the last segment of the board path.
    ///
    /// Rejects paths with empty, `.` or `..` segments and backslashes so
    /// the name can never escape the keyboards directory.
    pub fn board_name(&self) -> Result<&str, CoreError> {
        let path = self.board_path.as_str();
        let unknown = || CoreError::UnknownBoard(path.to_string());

        if path.is_empty() || path.contains('\\') || path.contains('\0') {
            return Err(unknown());
        }
        if path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(unknown());
        }

        path.rsplit('/').next().ok_or_else(unknown)
    }

    /// The subproject, checked to be a single path segment.
    ///
    /// Empty means no subproject. It ends up in the artifact file name, so
    /// separators, `.` and `..` are rejected.
    pub fn subproject_name(&self) -> Result<&str, CoreError> {
        let subproject = self.subproject.as_str();
        if subproject.contains(['/', '\\', '\0']) || subproject == "." || subproject == ".." {
            return Err(CoreError::InvalidInput(format!(
                "invalid subproject '{}'",
                subproject.escape_debug()
            )));
        }
        Ok(subproject)
    }
}

/// Board-supplied source fragments wrapped around the generated layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardTemplate {
    /// Text placed before the first layer block.
    pub prologue: String,

    /// Text placed after the last layer block.
    pub epilogue: String,
}

impl BoardTemplate {
    /// Create a new BoardTemplate.
    pub fn new(prologue: impl Into<String>, epilogue: impl Into<String>) -> Self {
        Self {
            prologue: prologue.into(),
            epilogue: epilogue.into(),
        }
    }
}
