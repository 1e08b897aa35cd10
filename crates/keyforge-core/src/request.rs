//! Parsing of uploaded layout documents into build requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BoardProperties, CoreError, LayerGrid};

/// Properties plus layers, as a caller submits them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Target board and subproject.
    pub properties: BoardProperties,

    /// Key-code assignments.
    pub layers: LayerGrid,
}

impl BuildRequest {
    /// Create a new BuildRequest.
    pub fn new(properties: BoardProperties, layers: LayerGrid) -> Self {
        Self { properties, layers }
    }

    /// Parse an uploaded layout document.
    ///
    /// Two shapes are accepted:
    /// - the editor's array form `[properties, physical_layout, layer0, ...]`,
    ///   where the physical layout is display-only and dropped;
    /// - an object `{"properties": {...}, "layers": [...]}`.
    pub fn from_upload_json(json: &str) -> Result<Self, CoreError> {
        let value: Value = serde_json::from_str(json)?;

        match value {
            Value::Array(mut items) => {
                if items.len() < 2 {
                    return Err(CoreError::InvalidInput(
                        "layout document needs properties and a physical layout".to_string(),
                    ));
                }
                let layers = items.split_off(2);
                let properties: BoardProperties = serde_json::from_value(items.swap_remove(0))?;
                let layers: LayerGrid = serde_json::from_value(Value::Array(layers))?;
                Ok(Self { properties, layers })
            }
            Value::Object(_) => Ok(serde_json::from_value(value)?),
            _ => Err(CoreError::InvalidInput(
                "layout document must be a JSON array or object".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_editor_array_form() {
        let json = r#"[
            {"directory": "keyboards/clueboard", "subproject": "rev1", "name": "Clueboard", "key_width": "52"},
            [["1u", "1u"]],
            [["KC_A", "KC_B"]],
            [["KC_1", "KC_2"]]
        ]"#;
        let request = BuildRequest::from_upload_json(json).unwrap();
        assert_eq!(request.properties.board_name().unwrap(), "clueboard");
        assert_eq!(request.properties.subproject, "rev1");
        assert_eq!(request.layers.len(), 2);
        assert_eq!(request.layers.layers()[1][0][1], "KC_2");
    }

    #[test]
    fn test_parse_object_form() {
        let json = r#"{
            "properties": {"boardPath": "boards/sample", "subproject": "rev1"},
            "layers": [[["KC_A", "KC_B"]]]
        }"#;
        let request = BuildRequest::from_upload_json(json).unwrap();
        assert_eq!(request.properties.board_path, "boards/sample");
        assert_eq!(request.layers.column_count(), Some(2));
    }

    #[test]
    fn test_parse_rejects_bad_documents() {
        assert!(matches!(
            BuildRequest::from_upload_json("[]"),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            BuildRequest::from_upload_json("42"),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            BuildRequest::from_upload_json("{not json"),
            Err(CoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_array_form_without_layers_parses_empty_grid() {
        let json = r#"[{"directory": "keyboards/clueboard", "subproject": ""}, []]"#;
        let request = BuildRequest::from_upload_json(json).unwrap();
        assert!(request.layers.is_empty());
        assert!(request.layers.validate().is_err());
    }
}
