//! Test doubles shared by the builder's unit tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use keyforge_core::BoardTemplate;
use keyforge_toolchain::{FirmwareTree, Invocation, RunOutput, Toolchain, ToolchainError};

use crate::pipeline::BuildPipeline;
use crate::registry::BoardRegistry;
use crate::state::InFlight;
use crate::Config;

/// Toolchain that records calls instead of running make.
#[derive(Clone)]
pub struct StubToolchain {
    tree: FirmwareTree,
    exit_code: i32,
    output: String,
    artifact: Option<Vec<u8>>,
    delay: Duration,
    clean_exit_code: i32,
    builds: Arc<AtomicUsize>,
    cleans: Arc<AtomicUsize>,
    cleaned: Arc<std::sync::Mutex<Vec<Invocation>>>,
}

impl StubToolchain {
    /// A toolchain that exits 0 without writing an artifact.
    pub fn new(tree: FirmwareTree) -> Self {
        Self {
            tree,
            exit_code: 0,
            output: String::new(),
            artifact: None,
            delay: Duration::ZERO,
            clean_exit_code: 0,
            builds: Arc::new(AtomicUsize::new(0)),
            cleans: Arc::new(AtomicUsize::new(0)),
            cleaned: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Write `bytes` to the expected artifact path on every build.
    pub fn writing_artifact(mut self, bytes: &[u8]) -> Self {
        self.artifact = Some(bytes.to_vec());
        self
    }

    /// Exit with `code` and print `output` on every build.
    pub fn exiting(mut self, code: i32, output: &str) -> Self {
        self.exit_code = code;
        self.output = output.to_string();
        self
    }

    /// Sleep before finishing each build.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Exit with `code` on every clean.
    pub fn failing_clean(mut self, code: i32) -> Self {
        self.clean_exit_code = code;
        self
    }

    /// Number of builds run.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Number of cleans run.
    pub fn cleans(&self) -> usize {
        self.cleans.load(Ordering::SeqCst)
    }

    /// Invocations passed to clean, in order.
    pub fn cleaned(&self) -> Vec<Invocation> {
        self.cleaned.lock().unwrap().clone()
    }
}

#[async_trait]
impl Toolchain for StubToolchain {
    fn tree(&self) -> &FirmwareTree {
        &self.tree
    }

    async fn build(&self, invocation: &Invocation) -> Result<RunOutput, ToolchainError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(artifact) = &self.artifact {
            tokio::fs::write(self.tree.artifact_path(invocation), artifact).await?;
        }
        Ok(RunOutput {
            exit_code: self.exit_code,
            command: vec!["make".to_string()],
            output: self.output.clone(),
        })
    }

    async fn clean(&self, invocation: &Invocation) -> Result<RunOutput, ToolchainError> {
        self.cleans.fetch_add(1, Ordering::SeqCst);
        self.cleaned.lock().unwrap().push(invocation.clone());
        Ok(RunOutput {
            exit_code: self.clean_exit_code,
            command: vec!["make".to_string(), "clean".to_string()],
            output: String::new(),
        })
    }
}

/// Scratch firmware tree with one board, `sample`, registered.
pub struct Fixture {
    _dir: TempDir,
    tree: FirmwareTree,
    registry: Arc<BoardRegistry>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let tree = FirmwareTree::new(dir.path().join("firmware"));
        std::fs::create_dir_all(tree.board_dir("sample")).unwrap();

        let registry = BoardRegistry::from_boards([(
            "sample".to_string(),
            Some(BoardTemplate::new("PRE", "POST")),
        )]);

        Self {
            _dir: dir,
            tree,
            registry: Arc::new(registry),
        }
    }

    pub fn tree(&self) -> &FirmwareTree {
        &self.tree
    }

    pub fn registry(&self) -> Arc<BoardRegistry> {
        self.registry.clone()
    }

    pub fn keymaps_dir(&self) -> PathBuf {
        self.tree.keymaps_dir("sample")
    }

    pub fn pipeline(&self, toolchain: StubToolchain) -> BuildPipeline {
        BuildPipeline::new(self.registry(), Arc::new(toolchain), 5, InFlight::new())
    }

    /// Config pointing at this fixture, with fast background loops.
    pub fn config(&self) -> Config {
        Config {
            firmware_dir: self.tree.root().to_path_buf(),
            worker_count: 2,
            sweep_interval_secs: 1,
            ..Config::default()
        }
    }
}
