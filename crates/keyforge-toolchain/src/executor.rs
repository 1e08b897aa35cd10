//! `make` executor for building firmware via subprocess.
//!
//! Each call spawns one `make` process with the firmware root as its
//! working directory. Stdout and stderr are read line-by-line by two reader
//! tasks feeding a single channel, so the captured output follows the order
//! in which lines arrived.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::error::ToolchainError;
use crate::toolchain::Toolchain;
use crate::tree::FirmwareTree;
use crate::types::{Invocation, RunOutput};

/// Toolchain that drives the firmware checkout's Makefile.
///
/// # Example
///
/// ```rust,no_run
/// use keyforge_toolchain::{FirmwareTree, MakeToolchain};
///
/// let toolchain = MakeToolchain::new("make", FirmwareTree::new("qmk_firmware"))
///     .with_arg("-j4")
///     .with_env("SKIP_GIT", "yes");
/// ```
#[derive(Debug, Clone)]
pub struct MakeToolchain {
    /// Path to the make executable.
    make_path: String,

    /// Firmware checkout to run in.
    tree: FirmwareTree,

    /// Arguments placed before the build parameters.
    args: Vec<String>,

    /// Additional environment variables.
    env_vars: Vec<(String, String)>,
}

impl MakeToolchain {
    /// Create a new toolchain with the given make executable.
    ///
    /// The path can be just "make" to use PATH lookup, or a full path.
    pub fn new(make_path: impl Into<String>, tree: FirmwareTree) -> Self {
        Self {
            make_path: make_path.into(),
            tree,
            args: Vec::new(),
            env_vars: Vec::new(),
        }
    }

    /// Add an argument placed before the build parameters.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// The full command line for an invocation and optional make target.
    pub fn command_line(&self, invocation: &Invocation, target: Option<&str>) -> Vec<String> {
        let mut command = Vec::with_capacity(self.args.len() + 5);
        command.push(self.make_path.clone());
        command.extend(self.args.iter().cloned());
        command.extend(invocation.parameters());
        if let Some(target) = target {
            command.push(target.to_string());
        }
        command
    }

    async fn run(
        &self,
        invocation: &Invocation,
        target: Option<&str>,
    ) -> Result<RunOutput, ToolchainError> {
        let command = self.command_line(invocation, target);

        info!(
            board = %invocation.board,
            subproject = %invocation.subproject,
            keymap = %invocation.keymap,
            target = target.unwrap_or("default"),
            root = %self.tree.root().display(),
            "Running toolchain"
        );

        let mut cmd = Command::new(&self.make_path);
        cmd.args(&command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(self.tree.root())
            .kill_on_drop(true);

        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        debug!("Full command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            error!(error = %e, program = %self.make_path, "Failed to spawn toolchain");
            ToolchainError::Spawn {
                program: self.make_path.clone(),
                source: e,
            }
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(ToolchainError::Pipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ToolchainError::Pipe("stderr"))?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        let stdout_reader = tokio::spawn(forward_lines(stdout, line_tx.clone(), "stdout"));
        let stderr_reader = tokio::spawn(forward_lines(stderr, line_tx, "stderr"));

        // The channel closes once both readers reach EOF.
        let mut output = String::new();
        let mut line_count = 0u64;
        while let Some(line) = line_rx.recv().await {
            line_count += 1;
            output.push_str(&line);
        }
        let _ = tokio::join!(stdout_reader, stderr_reader);

        let status = child.wait().await?;
        let exit_code = status.code().unwrap_or(-1);

        info!(
            keymap = %invocation.keymap,
            exit_code = exit_code,
            success = status.success(),
            lines = line_count,
            "Toolchain exited"
        );

        Ok(RunOutput {
            exit_code,
            command,
            output,
        })
    }
}

#[async_trait]
impl Toolchain for MakeToolchain {
    fn tree(&self) -> &FirmwareTree {
        &self.tree
    }

    async fn build(&self, invocation: &Invocation) -> Result<RunOutput, ToolchainError> {
        self.run(invocation, None).await
    }

    async fn clean(&self, invocation: &Invocation) -> Result<RunOutput, ToolchainError> {
        self.run(invocation, Some("clean")).await
    }
}

/// Forward every line of a stream, newline included, until EOF.
async fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break, // EOF
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).into_owned();
                trace!(stream = name, line = %line.trim_end(), "Toolchain output");
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, stream = name, "Error reading toolchain output");
                break;
            }
        }
    }
}
