//! BuildJob type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BoardProperties, JobId, LayerGrid};

/// A request to build firmware for one board from one layer grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildJob {
    /// Unique job identifier.
    pub id: JobId,

    /// Target board and subproject.
    pub properties: BoardProperties,

    /// Key-code assignments, one grid per layer.
    pub layers: LayerGrid,

    /// When the job was submitted.
    pub submitted_at: DateTime<Utc>,
}

impl BuildJob {
    /// Create a new BuildJob.
    pub fn new(properties: BoardProperties, layers: LayerGrid) -> Self {
        Self {
            id: JobId::generate(),
            properties,
            layers,
            submitted_at: Utc::now(),
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }
}
