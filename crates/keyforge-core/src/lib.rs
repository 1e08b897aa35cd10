//! Keyforge Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Subprocesses or the firmware toolchain
//! - The filesystem
//! - Runtime specifics
//!
//! All types here describe what a firmware build request is and what a
//! build can produce. Keymap source assembly lives here too because it is a
//! pure function of a board template and a layer grid.

pub mod board;
pub mod error;
pub mod ids;
pub mod job;
pub mod keymap;
pub mod layers;
pub mod request;
pub mod result;
pub mod status;

// Re-export commonly used types
pub use board::{BoardProperties, BoardTemplate};
pub use error::CoreError;
pub use ids::{BuildId, JobId};
pub use job::BuildJob;
pub use keymap::assemble;
pub use layers::{Layer, LayerGrid, Row};
pub use request::BuildRequest;
pub use result::{BuildResult, ToolchainFailure, ValidationReason};
pub use status::JobState;
