//! Retention of job records and build workspaces.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use keyforge_core::{BoardProperties, BuildId};
use keyforge_toolchain::{FirmwareTree, Invocation};

use crate::registry::BoardRegistry;
use crate::state::{InFlight, JobTable};
use crate::workspace::PROPERTIES_FILE;

/// What one workspace sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Workspaces deleted.
    pub removed: usize,

    /// Firmware files of deleted workspaces removed from the tree root.
    pub artifacts_removed: usize,

    /// Build workspaces still within retention or in use.
    pub kept: usize,

    /// Workspaces that could not be inspected or deleted.
    pub errors: usize,
}

/// Delete build workspaces older than `max_age`, with their firmware.
///
/// Only directories named like a build identity and holding build metadata
/// are considered, so hand-written keymaps survive. Workspaces in
/// `in_flight` are never touched. The firmware file a workspace produced is
/// located from its recorded properties; other files in the tree root are
/// left alone.
pub fn sweep_workspaces<'a>(
    tree: &FirmwareTree,
    boards: impl IntoIterator<Item = &'a str>,
    max_age: Duration,
    in_flight: &InFlight,
) -> SweepReport {
    let now = SystemTime::now();
    let mut report = SweepReport::default();

    for board in boards {
        let keymaps_dir = tree.keymaps_dir(board);
        let entries = match std::fs::read_dir(&keymaps_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(dir = %keymaps_dir.display(), error = %e, "Cannot list keymaps");
                report.errors += 1;
                continue;
            }
        };

        for entry in entries.flatten() {
            let dir = entry.path();
            if !is_build_workspace(&dir) {
                continue;
            }
            if in_flight.contains(&dir) {
                report.kept += 1;
                continue;
            }

            let age = match std::fs::metadata(&dir).and_then(|m| m.modified()) {
                Ok(modified) => now.duration_since(modified).unwrap_or(Duration::ZERO),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Cannot read workspace age");
                    report.errors += 1;
                    continue;
                }
            };
            if age < max_age {
                report.kept += 1;
                continue;
            }

            let artifact = built_artifact(tree, board, &dir);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {
                    debug!(dir = %dir.display(), "Removed expired workspace");
                    report.removed += 1;
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to remove workspace");
                    report.errors += 1;
                    continue;
                }
            }

            let Some(artifact) = artifact else {
                continue;
            };
            match std::fs::remove_file(&artifact) {
                Ok(()) => {
                    debug!(path = %artifact.display(), "Removed expired firmware");
                    report.artifacts_removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %artifact.display(), error = %e, "Failed to remove firmware");
                    report.errors += 1;
                }
            }
        }
    }

    report
}

/// Firmware path for the build a workspace belongs to.
fn built_artifact(tree: &FirmwareTree, board: &str, dir: &Path) -> Option<PathBuf> {
    let keymap = dir.file_name()?.to_str().and_then(BuildId::parse)?;
    let text = match std::fs::read_to_string(dir.join(PROPERTIES_FILE)) {
        Ok(text) => text,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read workspace properties");
            return None;
        }
    };
    let properties: BoardProperties = match serde_json::from_str(&text) {
        Ok(properties) => properties,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Unreadable workspace properties");
            return None;
        }
    };
    let subproject = properties.subproject_name().ok()?;
    Some(tree.artifact_path(&Invocation::new(board, subproject, keymap)))
}

fn is_build_workspace(dir: &Path) -> bool {
    let named_like_build = dir
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(BuildId::parse)
        .is_some();
    named_like_build && dir.is_dir() && dir.join(PROPERTIES_FILE).is_file()
}

/// How long job records and workspaces are kept, and how often to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Age after which finished job records are dropped.
    pub job_retention: Duration,

    /// Age after which build workspaces are deleted, `None` keeps them.
    pub workspace_retention: Option<Duration>,

    /// Time between sweeps.
    pub interval: Duration,
}

/// Periodically evict old job records and sweep expired workspaces.
///
/// Runs until `shutdown` flips to true or its sender is dropped.
pub async fn run_reaper(
    jobs: Arc<JobTable>,
    registry: Arc<BoardRegistry>,
    tree: FirmwareTree,
    in_flight: Arc<InFlight>,
    policy: RetentionPolicy,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let evicted = jobs.evict_finished_before(cutoff(policy.job_retention));
        if evicted > 0 {
            debug!(evicted = evicted, "Evicted finished job records");
        }

        let Some(max_age) = policy.workspace_retention else {
            continue;
        };
        let registry = registry.clone();
        let tree = tree.clone();
        let in_flight = in_flight.clone();
        let swept = tokio::task::spawn_blocking(move || {
            sweep_workspaces(&tree, registry.names(), max_age, &in_flight)
        })
        .await;
        match swept {
            Ok(report) if report.removed > 0 || report.errors > 0 => {
                info!(
                    removed = report.removed,
                    artifacts_removed = report.artifacts_removed,
                    kept = report.kept,
                    errors = report.errors,
                    "Workspace sweep finished"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Workspace sweep panicked"),
        }
    }

    info!("Reaper stopped");
}

/// Records finished before this instant are expired.
fn cutoff(retention: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|retention| now.checked_sub_signed(retention))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
