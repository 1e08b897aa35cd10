//! Shared job state.
//!
//! The [`JobTable`] is the only place job states change. Every record
//! publishes its latest [`JobSnapshot`] on a `watch` channel so callers can
//! wait for a result without polling.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use keyforge_core::{BuildId, BuildJob, BuildResult, CoreError, JobId, JobState};

/// Point-in-time view of a job.
#[derive(Debug, Clone, Default)]
pub struct JobSnapshot {
    /// Current state.
    pub state: JobState,

    /// Recorded result, set once the build finished.
    pub result: Option<Arc<BuildResult>>,

    /// Build identity, if one was allocated.
    pub keymap: Option<BuildId>,

    /// When the result was recorded.
    pub finished_at: Option<DateTime<Utc>>,
}

/// A job and the channel its snapshots are published on.
struct JobRecord {
    job: Arc<BuildJob>,
    snapshot: watch::Sender<JobSnapshot>,
    retrieved: bool,
}

/// Jobs indexed by JobId.
#[derive(Default)]
pub struct JobTable {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl JobTable {
    /// Create a new JobTable wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert a queued job, returning a receiver for its snapshots.
    pub fn insert(&self, job: BuildJob) -> watch::Receiver<JobSnapshot> {
        let (tx, rx) = watch::channel(JobSnapshot::default());
        let id = job.id.clone();
        self.write().insert(
            id,
            JobRecord {
                job: Arc::new(job),
                snapshot: tx,
                retrieved: false,
            },
        );
        rx
    }

    /// Drop a job outright (used when it could not be enqueued).
    pub fn remove(&self, id: &JobId) {
        self.write().remove(id);
    }

    /// The submitted job.
    pub fn job(&self, id: &JobId) -> Option<Arc<BuildJob>> {
        self.read().get(id).map(|r| r.job.clone())
    }

    /// Current state of a job.
    pub fn state(&self, id: &JobId) -> Option<JobState> {
        self.read().get(id).map(|r| r.snapshot.borrow().state)
    }

    /// Number of jobs currently tracked.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True if no jobs are tracked.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Move a job to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&self, id: &JobId, next: JobState) -> Result<(), CoreError> {
        let mut evict = false;
        let outcome = {
            let jobs = self.read();
            let record = jobs
                .get(id)
                .ok_or_else(|| CoreError::InvalidInput(format!("Unknown job: {id}")))?;
            let mut outcome = Ok(());
            record.snapshot.send_if_modified(|snapshot| {
                match snapshot.state.transition(next) {
                    Ok(state) => {
                        snapshot.state = state;
                        true
                    }
                    Err(e) => {
                        outcome = Err(e);
                        false
                    }
                }
            });
            if outcome.is_ok() && next == JobState::CleanupDone && record.retrieved {
                evict = true;
            }
            outcome
        };

        debug!(job_id = %id, state = %next, "Job state changed");
        if evict {
            self.remove(id);
        }
        outcome
    }

    /// Record a build result, moving the job to the matching outcome state.
    pub fn record_result(
        &self,
        id: &JobId,
        result: BuildResult,
        keymap: Option<BuildId>,
    ) -> Result<(), CoreError> {
        let jobs = self.read();
        let record = jobs
            .get(id)
            .ok_or_else(|| CoreError::InvalidInput(format!("Unknown job: {id}")))?;

        let next = result.state();
        let mut outcome = Ok(());
        let result = Arc::new(result);
        record.snapshot.send_if_modified(|snapshot| {
            match snapshot.state.transition(next) {
                Ok(state) => {
                    snapshot.state = state;
                    snapshot.result = Some(result.clone());
                    snapshot.keymap = keymap.clone();
                    snapshot.finished_at = Some(Utc::now());
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        outcome
    }

    /// Note that the caller has retrieved a job's result.
    ///
    /// The record is dropped right away if cleanup already finished,
    /// otherwise as soon as it does.
    pub fn mark_retrieved(&self, id: &JobId) {
        let mut jobs = self.write();
        let done = match jobs.get_mut(id) {
            Some(record) => {
                record.retrieved = true;
                record.snapshot.borrow().state == JobState::CleanupDone
            }
            None => false,
        };
        if done {
            jobs.remove(id);
        }
    }

    /// Drop every record whose build finished before `cutoff`.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, record| {
            record
                .snapshot
                .borrow()
                .finished_at
                .map_or(true, |finished| finished >= cutoff)
        });
        before - jobs.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Workspace directories a build or its cleanup is still using.
#[derive(Debug, Default)]
pub struct InFlight {
    dirs: Mutex<HashSet<PathBuf>>,
}

impl InFlight {
    /// Create a new InFlight set wrapped in Arc.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark a workspace as in use. Returns false if it already was.
    pub fn claim(&self, dir: &Path) -> bool {
        self.lock().insert(dir.to_path_buf())
    }

    /// Release a workspace.
    pub fn release(&self, dir: &Path) {
        self.lock().remove(dir);
    }

    /// True if a workspace is in use.
    pub fn contains(&self, dir: &Path) -> bool {
        self.lock().contains(dir)
    }

    /// Number of workspaces in use.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no workspace is in use.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.dirs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyforge_core::{BoardProperties, LayerGrid, ValidationReason};

    fn job() -> BuildJob {
        BuildJob::new(
            BoardProperties::new("boards/sample", "rev1"),
            LayerGrid::new(vec![vec![vec!["KC_A".to_string()]]]),
        )
    }

    #[test]
    fn test_lifecycle_is_published() {
        let table = JobTable::new();
        let job = job();
        let id = job.id.clone();
        let rx = table.insert(job);

        table.transition(&id, JobState::Running).unwrap();
        table
            .record_result(
                &id,
                BuildResult::validation(ValidationReason::UnknownBoard),
                None,
            )
            .unwrap();

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.state, JobState::ValidationFailed);
        assert!(snapshot.result.is_some());
        assert!(snapshot.finished_at.is_some());
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let table = JobTable::new();
        let job = job();
        let id = job.id.clone();
        table.insert(job);

        let err = table.transition(&id, JobState::CleanupDone).unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
        assert_eq!(table.state(&id), Some(JobState::Queued));

        let err = table
            .record_result(&id, BuildResult::validation(ValidationReason::UnknownBoard), None)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_retrieved_job_evicted_after_cleanup() {
        let table = JobTable::new();
        let job = job();
        let id = job.id.clone();
        table.insert(job);

        table.transition(&id, JobState::Running).unwrap();
        table
            .record_result(
                &id,
                BuildResult::validation(ValidationReason::MissingTemplate),
                None,
            )
            .unwrap();
        table.transition(&id, JobState::CleanupScheduled).unwrap();

        table.mark_retrieved(&id);
        assert_eq!(table.len(), 1);

        table.transition(&id, JobState::CleanupDone).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_evict_finished_before() {
        let table = JobTable::new();
        let finished = job();
        let finished_id = finished.id.clone();
        table.insert(finished);
        table.insert(job());

        table.transition(&finished_id, JobState::Running).unwrap();
        table
            .record_result(
                &finished_id,
                BuildResult::validation(ValidationReason::UnknownBoard),
                None,
            )
            .unwrap();

        assert_eq!(table.evict_finished_before(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(table.evict_finished_before(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert_eq!(table.len(), 1);
        assert!(table.job(&finished_id).is_none());
    }

    #[test]
    fn test_in_flight_claims() {
        let in_flight = InFlight::new();
        let dir = Path::new("/fw/keyboards/sample/keymaps/abc");

        assert!(in_flight.claim(dir));
        assert!(!in_flight.claim(dir));
        assert!(in_flight.contains(dir));

        in_flight.release(dir);
        assert!(in_flight.is_empty());
    }
}
