//! Keyforge Build Pipeline
//!
//! This crate turns submitted layer grids into firmware builds: it resolves
//! boards against an immutable registry, allocates collision-checked build
//! identities, creates one isolated workspace per build, runs the toolchain
//! on a fixed worker pool, and cleans up after every build.

pub mod cleanup;
pub mod config;
pub mod identity;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod retention;
pub mod state;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use cleanup::CleanupRequest;
pub use config::Config;
pub use identity::{AllocationError, IdentityAllocator};
pub use pipeline::{BuildPipeline, Execution};
pub use queue::{JobHandle, JobOutcome, JobQueue, SubmitError};
pub use registry::{BoardRegistry, ConfigError, RegisteredBoard};
pub use retention::{sweep_workspaces, RetentionPolicy, SweepReport};
pub use state::{InFlight, JobSnapshot, JobTable};
pub use workspace::{BuildWorkspace, WorkspaceError};
