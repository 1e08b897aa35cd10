//! Build identity allocation.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use thiserror::Error;
use tracing::warn;

use keyforge_core::BuildId;

/// Identity allocation errors.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Every candidate identity was already taken.
    #[error("No free build identity after {attempts} attempts in '{dir}'")]
    Exhausted { attempts: u32, dir: String },
}

/// Hands out build identities from a strictly increasing microsecond tick.
///
/// Ticks follow the wall clock but never repeat or go backwards within one
/// allocator, even when many callers allocate in the same microsecond.
#[derive(Debug)]
pub struct IdentityAllocator {
    last_tick: AtomicU64,
    max_attempts: u32,
}

impl IdentityAllocator {
    /// Create a new allocator that tries up to `max_attempts` identities.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            last_tick: AtomicU64::new(0),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Builder method to start after a given tick.
    pub fn with_last_tick(self, tick: u64) -> Self {
        self.last_tick.store(tick, Ordering::Release);
        self
    }

    /// Next candidate identity. Never returns the same id twice.
    pub fn next_id(&self) -> BuildId {
        BuildId::from_tick(self.next_tick())
    }

    /// Allocate an identity not yet used by a directory in `keymaps_dir`.
    ///
    /// A candidate that is already on disk is logged and replaced by a new
    /// one, up to the configured number of attempts.
    pub fn allocate(&self, keymaps_dir: &Path) -> Result<BuildId, AllocationError> {
        for attempt in 1..=self.max_attempts {
            let id = self.next_id();
            if !keymaps_dir.join(id.as_str()).exists() {
                return Ok(id);
            }
            warn!(
                keymap = %id,
                attempt = attempt,
                dir = %keymaps_dir.display(),
                "Build identity already in use, regenerating"
            );
        }

        Err(AllocationError::Exhausted {
            attempts: self.max_attempts,
            dir: keymaps_dir.display().to_string(),
        })
    }

    fn next_tick(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0);
        let mut last = self.last_tick.load(Ordering::Acquire);
        loop {
            let candidate = now.max(last.saturating_add(1));
            match self.last_tick.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self::new(5)
    }
}
