//! Post-build cleanup.
//!
//! Every finished job is handed to one cleanup task. Cleanup asks the
//! toolchain to clean the build's intermediates, then releases the
//! workspace for retention. Failures are logged and never reach the job's
//! recorded result.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use keyforge_core::{JobId, JobState};
use keyforge_toolchain::{Invocation, Toolchain};

use crate::state::{InFlight, JobTable};

/// Cleanup work for one finished job.
#[derive(Debug, Clone)]
pub struct CleanupRequest {
    /// Job being cleaned up.
    pub job_id: JobId,

    /// Parameters of the build, `None` if the job never got an identity.
    pub invocation: Option<Invocation>,

    /// Workspace to release once cleaning finished.
    pub workspace: Option<PathBuf>,
}

/// Run the toolchain's clean target for one invocation.
///
/// Returns true if the clean succeeded.
pub async fn clean(toolchain: &dyn Toolchain, invocation: &Invocation) -> bool {
    match toolchain.clean(invocation).await {
        Ok(run) if run.success() => {
            debug!(keymap = %invocation.keymap, "Cleaned build intermediates");
            true
        }
        Ok(run) => {
            warn!(
                keymap = %invocation.keymap,
                exit_code = run.exit_code,
                output = %run.output.trim_end(),
                "Toolchain clean failed"
            );
            false
        }
        Err(e) => {
            warn!(keymap = %invocation.keymap, error = %e, "Toolchain clean could not be run");
            false
        }
    }
}

/// Process cleanup requests until every sender is dropped.
pub async fn run_cleanup_loop(
    mut requests: mpsc::UnboundedReceiver<CleanupRequest>,
    toolchain: Arc<dyn Toolchain>,
    jobs: Arc<JobTable>,
    in_flight: Arc<InFlight>,
) {
    while let Some(request) = requests.recv().await {
        if let Some(invocation) = &request.invocation {
            clean(toolchain.as_ref(), invocation).await;
        }
        if let Some(workspace) = &request.workspace {
            in_flight.release(workspace);
        }
        if let Err(e) = jobs.transition(&request.job_id, JobState::CleanupDone) {
            warn!(job_id = %request.job_id, error = %e, "Failed to finish cleanup");
        }
    }

    info!("Cleanup loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, StubToolchain};
    use keyforge_core::{BoardProperties, BuildId, BuildJob, BuildResult, LayerGrid, ValidationReason};

    fn finished_job(jobs: &JobTable) -> JobId {
        let job = BuildJob::new(
            BoardProperties::new("boards/sample", "rev1"),
            LayerGrid::new(vec![vec![vec!["KC_A".to_string()]]]),
        );
        let id = job.id.clone();
        jobs.insert(job);
        jobs.transition(&id, JobState::Running).unwrap();
        jobs.record_result(&id, BuildResult::validation(ValidationReason::UnknownBoard), None)
            .unwrap();
        jobs.transition(&id, JobState::CleanupScheduled).unwrap();
        id
    }

    #[tokio::test]
    async fn test_clean_reports_failure_without_panicking() {
        let fixture = Fixture::new();
        let ok = StubToolchain::new(fixture.tree().clone());
        let failing = StubToolchain::new(fixture.tree().clone()).failing_clean(2);
        let invocation = Invocation::new("sample", "rev1", BuildId::from_tick(1));

        assert!(clean(&ok, &invocation).await);
        assert!(!clean(&failing, &invocation).await);
        assert_eq!(failing.cleans(), 1);
    }

    #[tokio::test]
    async fn test_loop_cleans_releases_and_finishes() {
        let fixture = Fixture::new();
        let stub = StubToolchain::new(fixture.tree().clone());
        let jobs = JobTable::new();
        let in_flight = InFlight::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let with_build = finished_job(&jobs);
        let rejected = finished_job(&jobs);
        let workspace = fixture.keymaps_dir().join("abc");
        in_flight.claim(&workspace);
        let invocation = Invocation::new("sample", "rev1", BuildId::from_tick(2));

        tx.send(CleanupRequest {
            job_id: with_build.clone(),
            invocation: Some(invocation.clone()),
            workspace: Some(workspace.clone()),
        })
        .unwrap();
        tx.send(CleanupRequest {
            job_id: rejected.clone(),
            invocation: None,
            workspace: None,
        })
        .unwrap();
        drop(tx);

        run_cleanup_loop(rx, Arc::new(stub.clone()), jobs.clone(), in_flight.clone()).await;

        assert_eq!(stub.cleans(), 1);
        assert_eq!(stub.cleaned(), vec![invocation]);
        assert!(!in_flight.contains(&workspace));
        assert_eq!(jobs.state(&with_build), Some(JobState::CleanupDone));
        assert_eq!(jobs.state(&rejected), Some(JobState::CleanupDone));
    }
}
