//! Job queue and worker pool.
//!
//! Submission is synchronous: a job is validated, recorded and pushed onto an
//! unbounded channel. A fixed number of workers pull job ids off the channel
//! and run them through the [`BuildPipeline`]; finished jobs are handed to
//! the cleanup task. Callers wait on the job's watch channel with a
//! timeout.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use keyforge_core::{BoardProperties, BuildJob, BuildResult, CoreError, JobId, JobState, LayerGrid};
use keyforge_toolchain::{FirmwareTree, MakeToolchain, Toolchain};

use crate::cleanup::{run_cleanup_loop, CleanupRequest};
use crate::config::Config;
use crate::pipeline::BuildPipeline;
use crate::registry::{BoardRegistry, ConfigError};
use crate::retention::{run_reaper, RetentionPolicy};
use crate::state::{InFlight, JobSnapshot, JobTable};

/// Submission errors.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The layer grid is structurally invalid.
    #[error("Invalid build request: {0}")]
    InvalidInput(#[from] CoreError),

    /// The queue is shutting down.
    #[error("Build queue is closed")]
    Closed,
}

/// What a caller gets back when waiting for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The build finished with this result.
    Complete(Arc<BuildResult>),

    /// The wait timed out; the build is still queued or running.
    Pending,
}

impl JobOutcome {
    /// The result, if the build finished.
    pub fn result(&self) -> Option<&BuildResult> {
        match self {
            Self::Complete(result) => Some(result),
            Self::Pending => None,
        }
    }
}

/// Handle to a submitted job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    snapshot: watch::Receiver<JobSnapshot>,
}

impl JobHandle {
    /// Id of the submitted job.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Latest published view of the job.
    pub fn snapshot(&self) -> JobSnapshot {
        self.snapshot.borrow().clone()
    }
}

/// Job queue served by a fixed pool of build workers.
pub struct JobQueue {
    jobs: Arc<JobTable>,
    submit_tx: mpsc::UnboundedSender<JobId>,
    workers: Vec<JoinHandle<()>>,
    cleanup: JoinHandle<()>,
    reaper: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    compile_timeout: Duration,
}

impl JobQueue {
    /// Scan the board templates and start a queue that builds with `make`.
    pub fn open(config: &Config) -> Result<Self, ConfigError> {
        let registry = BoardRegistry::scan(&config.templates_dir)?;
        let toolchain = MakeToolchain::new(
            config.make_path.clone(),
            FirmwareTree::new(config.firmware_dir.clone()),
        );
        Ok(Self::start(config, Arc::new(registry), Arc::new(toolchain)))
    }

    /// Start workers, cleanup and retention on the current runtime.
    pub fn start(
        config: &Config,
        registry: Arc<BoardRegistry>,
        toolchain: Arc<dyn Toolchain>,
    ) -> Self {
        let jobs = JobTable::new();
        let in_flight = InFlight::new();
        let pipeline = Arc::new(BuildPipeline::new(
            registry.clone(),
            toolchain.clone(),
            config.max_identity_attempts,
            in_flight.clone(),
        ));

        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let submit_rx = Arc::new(Mutex::new(submit_rx));
        let (cleanup_tx, cleanup_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker_count = config.worker_count.max(1);
        let workers = (0..worker_count)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    submit_rx.clone(),
                    jobs.clone(),
                    pipeline.clone(),
                    cleanup_tx.clone(),
                ))
            })
            .collect();
        drop(cleanup_tx);

        let cleanup = tokio::spawn(run_cleanup_loop(
            cleanup_rx,
            toolchain.clone(),
            jobs.clone(),
            in_flight.clone(),
        ));

        let policy = RetentionPolicy {
            job_retention: config.job_retention(),
            workspace_retention: config.workspace_retention(),
            interval: config.sweep_interval(),
        };
        let reaper = tokio::spawn(run_reaper(
            jobs.clone(),
            registry,
            toolchain.tree().clone(),
            in_flight,
            policy,
            shutdown_rx,
        ));

        info!(
            workers = worker_count,
            firmware_dir = %toolchain.tree().root().display(),
            "Build queue started"
        );

        Self {
            jobs,
            submit_tx,
            workers,
            cleanup,
            reaper,
            shutdown_tx,
            compile_timeout: config.compile_timeout(),
        }
    }

    /// Submit a build.
    ///
    /// Fails only on a structurally invalid layer grid or once the queue is
    /// shutting down; every other problem is reported in the job's result.
    /// Jobs beyond the worker count wait in the queue.
    pub fn submit(
        &self,
        properties: BoardProperties,
        layers: LayerGrid,
    ) -> Result<JobHandle, SubmitError> {
        layers.validate()?;

        let job = BuildJob::new(properties, layers);
        let id = job.id.clone();
        let snapshot = self.jobs.insert(job);

        if self.submit_tx.send(id.clone()).is_err() {
            self.jobs.remove(&id);
            warn!(job_id = %id, "Build queue closed, rejecting job");
            return Err(SubmitError::Closed);
        }
        debug!(job_id = %id, "Job queued");
        Ok(JobHandle { id, snapshot })
    }

    /// Wait up to `timeout` for a job's result.
    ///
    /// A timeout yields [`JobOutcome::Pending`]; the job keeps running and
    /// can be waited on again.
    pub async fn result(&self, handle: &JobHandle, timeout: Duration) -> JobOutcome {
        let mut rx = handle.snapshot.clone();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|snapshot| snapshot.result.is_some())
                .await
                .ok()
                .and_then(|snapshot| snapshot.result.clone())
        })
        .await;

        match waited {
            Ok(Some(result)) => {
                self.jobs.mark_retrieved(&handle.id);
                JobOutcome::Complete(result)
            }
            Ok(None) => {
                warn!(job_id = %handle.id, "Job was dropped before it finished");
                JobOutcome::Pending
            }
            Err(_) => {
                debug!(job_id = %handle.id, "Timed out waiting for build");
                JobOutcome::Pending
            }
        }
    }

    /// Wait for a job's result using the configured compile timeout.
    pub async fn wait(&self, handle: &JobHandle) -> JobOutcome {
        self.result(handle, self.compile_timeout).await
    }

    /// Wait up to `timeout` for a job's cleanup to finish.
    pub async fn settled(&self, handle: &JobHandle, timeout: Duration) -> bool {
        let mut rx = handle.snapshot.clone();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|snapshot| snapshot.state == JobState::CleanupDone)
                .await
                .is_ok()
        })
        .await;
        matches!(waited, Ok(true))
    }

    /// Current state of a job, `None` once its record is gone.
    pub fn status(&self, id: &JobId) -> Option<JobState> {
        self.jobs.state(id)
    }

    /// Stop accepting jobs, finish queued ones, then stop background tasks.
    pub async fn shutdown(self) {
        let Self {
            submit_tx,
            workers,
            cleanup,
            reaper,
            shutdown_tx,
            ..
        } = self;

        info!("Shutting down build queue");
        drop(submit_tx);

        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Build worker panicked");
            }
        }
        // Workers held the last cleanup senders.
        if let Err(e) = cleanup.await {
            warn!(error = %e, "Cleanup task panicked");
        }

        let _ = shutdown_tx.send(true);
        if let Err(e) = reaper.await {
            warn!(error = %e, "Reaper task panicked");
        }

        info!("Build queue stopped");
    }
}

async fn run_worker(
    worker: usize,
    jobs_rx: Arc<Mutex<mpsc::UnboundedReceiver<JobId>>>,
    jobs: Arc<JobTable>,
    pipeline: Arc<BuildPipeline>,
    cleanup_tx: mpsc::UnboundedSender<CleanupRequest>,
) {
    debug!(worker = worker, "Build worker started");

    loop {
        let next = jobs_rx.lock().await.recv().await;
        let Some(job_id) = next else {
            break;
        };
        let Some(job) = jobs.job(&job_id) else {
            warn!(job_id = %job_id, "Queued job has no record");
            continue;
        };
        if let Err(e) = jobs.transition(&job_id, JobState::Running) {
            warn!(job_id = %job_id, error = %e, "Cannot start job");
            continue;
        }

        let execution = pipeline.execute(&job).await;
        info!(
            worker = worker,
            job_id = %job_id,
            state = %execution.result.state(),
            "{}",
            execution.result
        );

        let keymap = execution.invocation.as_ref().map(|i| i.keymap.clone());
        if let Err(e) = jobs.record_result(&job_id, execution.result, keymap) {
            warn!(job_id = %job_id, error = %e, "Failed to record build result");
        }
        if let Err(e) = jobs.transition(&job_id, JobState::CleanupScheduled) {
            warn!(job_id = %job_id, error = %e, "Failed to schedule cleanup");
        }

        let request = CleanupRequest {
            job_id,
            invocation: execution.invocation,
            workspace: execution.workspace,
        };
        if cleanup_tx.send(request).is_err() {
            warn!(worker = worker, "Cleanup task is gone");
        }
    }

    debug!(worker = worker, "Build worker stopped");
}
