//! Build pipeline - turns one BuildJob into a BuildResult.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use keyforge_core::{BuildJob, BuildResult, CoreError, ToolchainFailure, ValidationReason};
use keyforge_toolchain::{Invocation, Toolchain};

use crate::identity::IdentityAllocator;
use crate::registry::BoardRegistry;
use crate::state::InFlight;
use crate::workspace::{BuildWorkspace, WorkspaceError};

/// What running one job produced.
#[derive(Debug)]
pub struct Execution {
    /// Classified result.
    pub result: BuildResult,

    /// Toolchain parameters, if an identity was allocated and its workspace created.
    pub invocation: Option<Invocation>,

    /// Workspace claimed in the in-flight set; released by cleanup.
    pub workspace: Option<PathBuf>,
}

impl Execution {
    fn rejected(reason: ValidationReason) -> Self {
        Self {
            result: BuildResult::validation(reason),
            invocation: None,
            workspace: None,
        }
    }
}

/// Runs builds against one firmware tree.
pub struct BuildPipeline {
    registry: Arc<BoardRegistry>,
    toolchain: Arc<dyn Toolchain>,
    identities: IdentityAllocator,
    max_identity_attempts: u32,
    in_flight: Arc<InFlight>,
}

impl BuildPipeline {
    /// Create a new BuildPipeline.
    pub fn new(
        registry: Arc<BoardRegistry>,
        toolchain: Arc<dyn Toolchain>,
        max_identity_attempts: u32,
        in_flight: Arc<InFlight>,
    ) -> Self {
        let max_identity_attempts = max_identity_attempts.max(1);
        Self {
            registry,
            toolchain,
            // One candidate per attempt; the attempt loop in `execute` is the bound.
            identities: IdentityAllocator::new(1),
            max_identity_attempts,
            in_flight,
        }
    }

    /// Builder method to allocate identities after a given tick.
    pub fn with_last_tick(mut self, tick: u64) -> Self {
        self.identities = self.identities.with_last_tick(tick);
        self
    }

    /// Board registry builds are resolved against.
    pub fn registry(&self) -> &BoardRegistry {
        &self.registry
    }

    /// Toolchain builds run with.
    pub fn toolchain(&self) -> &Arc<dyn Toolchain> {
        &self.toolchain
    }

    /// Workspaces currently in use.
    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    /// Run one job to a classified result.
    ///
    /// Validation failures return before any workspace or subprocess
    /// exists. Once a workspace exists it is claimed in the in-flight set
    /// and stays claimed until cleanup releases it.
    pub async fn execute(&self, job: &BuildJob) -> Execution {
        let tree = self.toolchain.tree();

        let subproject = match job.properties.subproject_name() {
            Ok(subproject) => subproject,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Rejected build for invalid subproject");
                return Execution::rejected(ValidationReason::UnknownBoard);
            }
        };

        let board = match self.registry.resolve(&job.properties) {
            Ok(board) if tree.has_board(board) => board,
            Ok(board) => {
                warn!(job_id = %job.id, board = %board, "Board missing from firmware tree");
                return Execution::rejected(ValidationReason::UnknownBoard);
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Rejected build for unknown board");
                return Execution::rejected(ValidationReason::UnknownBoard);
            }
        };

        let source = match self.registry.assemble(board, &job.layers) {
            Ok(source) => source,
            Err(CoreError::MissingTemplate(_)) => {
                warn!(job_id = %job.id, board = %board, "Board has no keymap template");
                return Execution::rejected(ValidationReason::MissingTemplate);
            }
            Err(e) => {
                warn!(job_id = %job.id, board = %board, error = %e, "Failed to assemble keymap");
                return Execution::rejected(ValidationReason::UnknownBoard);
            }
        };

        let keymaps_dir = tree.keymaps_dir(board);
        let mut workspace = None;
        for attempt in 1..=self.max_identity_attempts {
            let keymap = match self.identities.allocate(&keymaps_dir) {
                Ok(keymap) => keymap,
                Err(e) => {
                    debug!(job_id = %job.id, attempt = attempt, error = %e, "Identity taken");
                    continue;
                }
            };

            match BuildWorkspace::create(
                &keymaps_dir,
                &keymap,
                &source,
                &job.properties,
                &job.layers,
            )
            .await
            {
                Ok(created) => {
                    workspace = Some(created);
                    break;
                }
                Err(WorkspaceError::Collision(dir)) => {
                    warn!(
                        job_id = %job.id,
                        attempt = attempt,
                        dir = %dir.display(),
                        "Workspace appeared concurrently, regenerating identity"
                    );
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to create workspace");
                    return Execution {
                        result: BuildResult::ToolchainFailure(ToolchainFailure {
                            exit_code: -1,
                            command: Vec::new(),
                            output: e.to_string(),
                            missing_artifact: None,
                        }),
                        invocation: None,
                        workspace: None,
                    };
                }
            }
        }

        let Some(workspace) = workspace else {
            warn!(
                job_id = %job.id,
                attempts = self.max_identity_attempts,
                dir = %keymaps_dir.display(),
                "No free build identity"
            );
            return Execution::rejected(ValidationReason::IdentityCollision);
        };
        self.in_flight.claim(workspace.dir());

        let invocation = Invocation::new(
            board,
            subproject,
            workspace.keymap().clone(),
        );
        info!(
            job_id = %job.id,
            board = %invocation.board,
            keymap = %invocation.keymap,
            "Building firmware"
        );

        let result = self.build(&invocation).await;

        Execution {
            result,
            invocation: Some(invocation),
            workspace: Some(workspace.dir().to_path_buf()),
        }
    }

    async fn build(&self, invocation: &Invocation) -> BuildResult {
        let run = match self.toolchain.build(invocation).await {
            Ok(run) => run,
            Err(e) => {
                warn!(keymap = %invocation.keymap, error = %e, "Toolchain could not be run");
                return BuildResult::ToolchainFailure(ToolchainFailure {
                    exit_code: -1,
                    command: Vec::new(),
                    output: e.to_string(),
                    missing_artifact: None,
                });
            }
        };

        if !run.success() {
            return BuildResult::ToolchainFailure(ToolchainFailure {
                exit_code: run.exit_code,
                command: run.command,
                output: run.output,
                missing_artifact: None,
            });
        }

        let tree = self.toolchain.tree();
        let artifact_path = tree.artifact_path(invocation);
        match tokio::fs::read(&artifact_path).await {
            Ok(artifact) => BuildResult::Success {
                artifact,
                file_name: tree.artifact_name(invocation),
                output: run.output,
            },
            Err(e) => {
                warn!(
                    keymap = %invocation.keymap,
                    path = %artifact_path.display(),
                    error = %e,
                    "Toolchain exited 0 without an artifact"
                );
                BuildResult::ToolchainFailure(ToolchainFailure {
                    exit_code: run.exit_code,
                    command: run.command,
                    output: run.output,
                    missing_artifact: Some(artifact_path),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, StubToolchain};
    use keyforge_core::{BoardProperties, BuildId, LayerGrid};

    fn job(board_path: &str) -> BuildJob {
        BuildJob::new(
            BoardProperties::new(board_path, "rev1"),
            LayerGrid::new(vec![vec![vec!["KC_A".to_string(), "KC_B".to_string()]]]),
        )
    }

    /// A tick far in the future so identities are predictable.
    const FUTURE: u64 = 9_000_000_000_000_000;

    fn keymap_dirs(fixture: &Fixture) -> usize {
        std::fs::read_dir(fixture.tree().keymaps_dir("sample"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_unknown_board_fails_fast() {
        let fixture = Fixture::new();
        let stub = StubToolchain::new(fixture.tree().clone());
        let pipeline = fixture.pipeline(stub.clone());

        let execution = pipeline.execute(&job("boards/nope")).await;

        assert_eq!(
            execution.result,
            BuildResult::validation(ValidationReason::UnknownBoard)
        );
        assert!(execution.invocation.is_none());
        assert_eq!(stub.builds(), 0);
        assert_eq!(keymap_dirs(&fixture), 0);
    }

    #[tokio::test]
    async fn test_subproject_traversal_rejected_before_workspace() {
        let fixture = Fixture::new();
        let stub = StubToolchain::new(fixture.tree().clone()).writing_artifact(b"FW");
        let pipeline = fixture.pipeline(stub.clone());
        let job = BuildJob::new(
            BoardProperties::new("boards/sample", "../../escape"),
            LayerGrid::new(vec![vec![vec!["KC_A".to_string()]]]),
        );

        let execution = pipeline.execute(&job).await;

        assert_eq!(
            execution.result,
            BuildResult::validation(ValidationReason::UnknownBoard)
        );
        assert!(execution.invocation.is_none());
        assert_eq!(stub.builds(), 0);
        assert_eq!(keymap_dirs(&fixture), 0);
    }

    #[tokio::test]
    async fn test_registered_board_missing_from_tree_is_unknown() {
        let fixture = Fixture::new();
        std::fs::remove_dir_all(fixture.tree().board_dir("sample")).unwrap();
        let stub = StubToolchain::new(fixture.tree().clone());
        let pipeline = fixture.pipeline(stub.clone());

        let execution = pipeline.execute(&job("boards/sample")).await;

        assert_eq!(
            execution.result,
            BuildResult::validation(ValidationReason::UnknownBoard)
        );
        assert_eq!(stub.builds(), 0);
    }

    #[tokio::test]
    async fn test_missing_template_rejected() {
        let fixture = Fixture::new();
        std::fs::create_dir_all(fixture.tree().board_dir("bare")).unwrap();
        let registry = BoardRegistry::from_boards([("bare".to_string(), None)]);
        let stub = StubToolchain::new(fixture.tree().clone());
        let pipeline =
            BuildPipeline::new(Arc::new(registry), Arc::new(stub.clone()), 5, InFlight::new());

        let execution = pipeline.execute(&job("boards/bare")).await;

        assert_eq!(
            execution.result,
            BuildResult::validation(ValidationReason::MissingTemplate)
        );
        assert_eq!(stub.builds(), 0);
    }

    #[tokio::test]
    async fn test_success_reads_artifact_and_claims_workspace() {
        let fixture = Fixture::new();
        let stub = StubToolchain::new(fixture.tree().clone()).writing_artifact(b"FIRMWARE");
        let pipeline = fixture.pipeline(stub.clone());

        let execution = pipeline.execute(&job("boards/sample")).await;
        let invocation = execution.invocation.clone().unwrap();

        match &execution.result {
            BuildResult::Success {
                artifact,
                file_name,
                ..
            } => {
                assert_eq!(artifact, b"FIRMWARE");
                assert_eq!(file_name, &format!("sample_rev1_{}.hex", invocation.keymap));
            }
            other => panic!("expected success, got {other:?}"),
        }

        let workspace = execution.workspace.unwrap();
        assert!(pipeline.in_flight().contains(&workspace));
        let source = std::fs::read_to_string(workspace.join("keymap.c")).unwrap();
        assert!(source.contains("\t[0] = {\n\t\t{KC_A, KC_B}\n\t}"));
    }

    #[tokio::test]
    async fn test_exit_zero_without_artifact_is_failure() {
        let fixture = Fixture::new();
        let stub = StubToolchain::new(fixture.tree().clone());
        let pipeline = fixture.pipeline(stub);

        let execution = pipeline.execute(&job("boards/sample")).await;

        match execution.result {
            BuildResult::ToolchainFailure(failure) => {
                assert!(failure.is_anomalous_success());
                let invocation = execution.invocation.unwrap();
                assert_eq!(
                    failure.missing_artifact,
                    Some(fixture.tree().artifact_path(&invocation))
                );
            }
            other => panic!("expected toolchain failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_toolchain_failure() {
        let fixture = Fixture::new();
        let stub = StubToolchain::new(fixture.tree().clone()).exiting(2, "error: X\n");
        let pipeline = fixture.pipeline(stub);

        let execution = pipeline.execute(&job("boards/sample")).await;

        match execution.result {
            BuildResult::ToolchainFailure(failure) => {
                assert_eq!(failure.exit_code, 2);
                assert!(failure.output.contains("error: X"));
                assert!(failure.missing_artifact.is_none());
            }
            other => panic!("expected toolchain failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_jobs_get_distinct_workspaces() {
        let fixture = Fixture::new();
        let stub = StubToolchain::new(fixture.tree().clone()).writing_artifact(b"FW");
        let pipeline = Arc::new(fixture.pipeline(stub));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let pipeline = pipeline.clone();
            tasks.spawn(async move { pipeline.execute(&job("boards/sample")).await });
        }

        let mut workspaces = std::collections::HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            let execution = joined.unwrap();
            assert!(execution.result.is_success());
            assert!(workspaces.insert(execution.workspace.unwrap()));
        }
        assert_eq!(workspaces.len(), 8);
        assert_eq!(keymap_dirs(&fixture), 8);
    }

    #[tokio::test]
    async fn test_taken_identities_are_skipped() {
        let fixture = Fixture::new();
        for tick in [FUTURE + 1, FUTURE + 2] {
            let taken = fixture.keymaps_dir().join(BuildId::from_tick(tick).as_str());
            std::fs::create_dir_all(taken).unwrap();
        }
        let stub = StubToolchain::new(fixture.tree().clone()).writing_artifact(b"FW");
        let pipeline = fixture.pipeline(stub).with_last_tick(FUTURE);

        let execution = pipeline.execute(&job("boards/sample")).await;

        assert!(execution.result.is_success());
        assert_eq!(
            execution.invocation.unwrap().keymap,
            BuildId::from_tick(FUTURE + 3)
        );
    }

    #[tokio::test]
    async fn test_identity_collision_after_max_attempts() {
        let fixture = Fixture::new();
        for tick in FUTURE + 1..=FUTURE + 4 {
            let taken = fixture.keymaps_dir().join(BuildId::from_tick(tick).as_str());
            std::fs::create_dir_all(taken).unwrap();
        }
        let stub = StubToolchain::new(fixture.tree().clone());
        let pipeline =
            BuildPipeline::new(fixture.registry(), Arc::new(stub.clone()), 3, InFlight::new())
                .with_last_tick(FUTURE);

        let execution = pipeline.execute(&job("boards/sample")).await;

        assert_eq!(
            execution.result,
            BuildResult::validation(ValidationReason::IdentityCollision)
        );
        assert!(execution.invocation.is_none());
        assert_eq!(stub.builds(), 0);
        // Exactly three candidates were tried, so the fourth is still next.
        assert_eq!(
            pipeline.identities.next_id(),
            BuildId::from_tick(FUTURE + 4)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_workspace_collision_regenerates_identity() {
        let fixture = Fixture::new();
        std::fs::create_dir_all(fixture.keymaps_dir()).unwrap();
        // A dangling link passes the existence check but blocks the mkdir.
        let racing = fixture.keymaps_dir().join(BuildId::from_tick(FUTURE + 1).as_str());
        std::os::unix::fs::symlink(fixture.keymaps_dir().join("gone"), &racing).unwrap();
        let stub = StubToolchain::new(fixture.tree().clone()).writing_artifact(b"FW");
        let pipeline = fixture.pipeline(stub.clone()).with_last_tick(FUTURE);

        let execution = pipeline.execute(&job("boards/sample")).await;

        assert!(execution.result.is_success());
        assert_eq!(
            execution.invocation.unwrap().keymap,
            BuildId::from_tick(FUTURE + 2)
        );
        assert_eq!(stub.builds(), 1);
    }
}
