//! Layer grids of key-code symbols.

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// One row of key-code symbols.
pub type Row = Vec<String>;

/// One full grid of key-code assignments.
pub type Layer = Vec<Row>;

/// Ordered layers of a keymap. Layer 0 is the base layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerGrid(Vec<Layer>);

impl LayerGrid {
    /// Create a new LayerGrid.
    pub fn new(layers: Vec<Layer>) -> Self {
        Self(layers)
    }

    /// Get the layers.
    pub fn layers(&self) -> &[Layer] {
        &self.0
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no layers at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over layers in order.
    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.0.iter()
    }

    /// Column count of the grid, taken from the first row of the base layer.
    pub fn column_count(&self) -> Option<usize> {
        self.0.first()?.first().map(Vec::len)
    }

    /// Check the structural invariants of the grid.
    ///
    /// There must be a non-empty base layer, every row in every layer must
    /// have the same non-zero column count, and no symbol may be blank.
    pub fn validate(&self) -> Result<(), CoreError> {
        let base = self
            .0
            .first()
            .ok_or_else(|| CoreError::InvalidInput("layer list is empty".to_string()))?;
        if base.is_empty() {
            return Err(CoreError::InvalidInput("base layer has no rows".to_string()));
        }

        let columns = self.column_count().unwrap_or(0);
        if columns == 0 {
            return Err(CoreError::InvalidInput("base layer has no columns".to_string()));
        }

        for (layer_num, layer) in self.0.iter().enumerate() {
            for (row_num, row) in layer.iter().enumerate() {
                if row.len() != columns {
                    return Err(CoreError::InvalidInput(format!(
                        "layer {layer_num} row {row_num} has {} columns, expected {columns}",
                        row.len()
                    )));
                }
                if row.iter().any(|symbol| symbol.trim().is_empty()) {
                    return Err(CoreError::InvalidInput(format!(
                        "layer {layer_num} row {row_num} contains a blank key code"
                    )));
                }
            }
        }

        Ok(())
    }
}

impl From<Vec<Layer>> for LayerGrid {
    fn from(layers: Vec<Layer>) -> Self {
        Self(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(layers: &[&[&[&str]]]) -> LayerGrid {
        LayerGrid::new(
            layers
                .iter()
                .map(|layer| {
                    layer
                        .iter()
                        .map(|row| row.iter().map(|s| s.to_string()).collect())
                        .collect()
                })
                .collect(),
        )
    }

    #[test]
    fn test_valid_grid() {
        let layers = grid(&[&[&["KC_A", "KC_B"], &["KC_C", "KC_D"]], &[&["KC_1", "KC_2"]]]);
        assert!(layers.validate().is_ok());
        assert_eq!(layers.column_count(), Some(2));
        assert_eq!(layers.len(), 2);
    }

    #[test]
    fn test_empty_grid_rejected() {
        assert!(matches!(
            LayerGrid::default().validate(),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(grid(&[&[]]).validate().is_err());
        assert!(grid(&[&[&[]]]).validate().is_err());
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let layers = grid(&[&[&["KC_A", "KC_B"]], &[&["KC_1"]]]);
        let err = layers.validate().unwrap_err();
        assert!(err.to_string().contains("layer 1 row 0"));
    }

    #[test]
    fn test_blank_symbol_rejected() {
        let layers = grid(&[&[&["KC_A", " "]]]);
        assert!(layers.validate().is_err());
    }

    #[test]
    fn test_serializes_as_nested_arrays() {
        let layers = grid(&[&[&["KC_A", "KC_B"]]]);
        assert_eq!(
            serde_json::to_string(&layers).unwrap(),
            r#"[[["KC_A","KC_B"]]]"#
        );
    }
}
