//! Firmware toolchain for Keyforge
//!
//! This crate runs the external `make`-based firmware toolchain as a
//! subprocess scoped to a firmware checkout, capturing its combined output
//! and exit status without interpreting either.
//!
//! # Example
//!
//! ```rust,no_run
//! use keyforge_core::BuildId;
//! use keyforge_toolchain::{FirmwareTree, Invocation, MakeToolchain, Toolchain};
//!
//! async fn build() -> Result<(), Box<dyn std::error::Error>> {
//!     let toolchain = MakeToolchain::new("make", FirmwareTree::new("qmk_firmware"));
//!
//!     let invocation = Invocation::new("clueboard", "rev1", BuildId::from_tick(42));
//!     let output = toolchain.build(&invocation).await?;
//!
//!     println!("exit code: {}", output.exit_code);
//!     Ok(())
//! }
//! ```

mod error;
mod executor;
mod toolchain;
mod tree;
mod types;

// Re-export main types
pub use error::ToolchainError;
pub use executor::MakeToolchain;
pub use toolchain::Toolchain;
pub use tree::FirmwareTree;
pub use types::{Invocation, RunOutput};
