//! Builder configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Builder configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the firmware checkout the toolchain runs in.
    pub firmware_dir: PathBuf,

    /// Directory with one subdirectory of keymap templates per board.
    pub templates_dir: PathBuf,

    /// make executable.
    pub make_path: String,

    /// Number of build workers.
    pub worker_count: usize,

    /// Identities tried before a build fails with an identity collision.
    pub max_identity_attempts: u32,

    /// How long callers wait for a build by default (seconds).
    pub compile_timeout_secs: u64,

    /// How long finished job records are kept (seconds).
    pub job_retention_secs: u64,

    /// How long build workspaces are kept on disk (seconds), `None` keeps them forever.
    pub workspace_retention_secs: Option<u64>,

    /// Interval between retention sweeps (seconds).
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Default caller wait.
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    /// Retention of finished job records.
    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    /// Retention of build workspaces.
    pub fn workspace_retention(&self) -> Option<Duration> {
        self.workspace_retention_secs.map(Duration::from_secs)
    }

    /// Interval between retention sweeps, never zero.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            firmware_dir: PathBuf::from("qmk_firmware"),
            templates_dir: PathBuf::from("keyboards"),
            make_path: "make".to_string(),
            worker_count: 4,
            max_identity_attempts: 5,
            compile_timeout_secs: 60,
            job_retention_secs: 600,
            workspace_retention_secs: Some(24 * 60 * 60),
            sweep_interval_secs: 300,
        }
    }
}
