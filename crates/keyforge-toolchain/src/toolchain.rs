//! The toolchain seam used by the build pipeline.

use async_trait::async_trait;

use crate::error::ToolchainError;
use crate::tree::FirmwareTree;
use crate::types::{Invocation, RunOutput};

/// An external firmware toolchain.
///
/// Implementations must be safe to call concurrently for different
/// invocations and must never change process-wide state such as the
/// current directory.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Layout of the firmware checkout this toolchain builds in.
    fn tree(&self) -> &FirmwareTree;

    /// Build firmware for an invocation.
    async fn build(&self, invocation: &Invocation) -> Result<RunOutput, ToolchainError>;

    /// Run the clean step for an invocation.
    async fn clean(&self, invocation: &Invocation) -> Result<RunOutput, ToolchainError>;
}
