//! Keymap source assembly.
//!
//! The generated source is the board prologue, one indexed array
//! initializer per layer, and the board epilogue, joined by newlines:
//!
//! ```text
//! <prologue>
//! 	[0] = {
//! 		{KC_A, KC_B}, \
//! 		{KC_C, KC_D}
//! 	},
//! 	[1] = {
//! 		...
//! 	}
//! <epilogue>
//! ```

use crate::{BoardTemplate, LayerGrid};

/// Separator between rows inside one layer block.
const ROW_CONTINUATION: &str = ", \\\n";

/// Assemble keymap source for a layer grid.
///
/// Pure and deterministic: identical inputs give byte-identical output.
pub fn assemble(template: &BoardTemplate, layers: &LayerGrid) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(layers.len() * 3 + 2);
    parts.push(template.prologue.clone());

    for (layer_num, layer) in layers.iter().enumerate() {
        if layer_num != 0 {
            if let Some(previous) = parts.last_mut() {
                previous.push(',');
            }
        }

        let rows: Vec<String> = layer
            .iter()
            .map(|row| format!("\t\t{{{}}}", row.join(", ")))
            .collect();

        parts.push(format!("\t[{layer_num}] = {{"));
        parts.push(rows.join(ROW_CONTINUATION));
        parts.push("\t}".to_string());
    }

    parts.push(template.epilogue.clone());
    parts.join("\n")
}
