//! Keyforge CLI - build keyboard firmware from layout files.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use keyforge_builder::{BoardRegistry, Config, JobOutcome, JobQueue};
use keyforge_core::{BuildRequest, BuildResult};
use keyforge_toolchain::FirmwareTree;

/// Keyforge - keyboard firmware builder
#[derive(Parser)]
#[command(name = "keyforge")]
#[command(about = "Build keyboard firmware from layout files", long_about = None)]
struct Cli {
    /// Root of the firmware checkout
    #[arg(long, default_value = "qmk_firmware")]
    firmware_dir: PathBuf,

    /// Directory with keymap templates, one subdirectory per board
    #[arg(long, default_value = "keyboards")]
    templates_dir: PathBuf,

    /// make executable
    #[arg(long, default_value = "make")]
    make: String,

    /// Number of build workers
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List boards that have keymap templates
    Boards {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate keymap source without building
    Keymap {
        /// Layout file
        layout: PathBuf,

        /// Write the source here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build firmware for a layout
    Build {
        /// Layout file
        layout: PathBuf,

        /// Where to write the firmware (defaults to its file name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seconds to wait for the build (defaults to the compile timeout)
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config {
        firmware_dir: cli.firmware_dir,
        templates_dir: cli.templates_dir,
        make_path: cli.make,
        worker_count: cli.workers,
        ..Config::default()
    };

    match cli.command {
        Commands::Boards { json } => list_boards(&config, json),
        Commands::Keymap { layout, output } => keymap(&config, &layout, output.as_deref()),
        Commands::Build {
            layout,
            output,
            timeout,
        } => build(config, &layout, output, timeout.map(Duration::from_secs)).await,
    }
}

fn list_boards(config: &Config, json: bool) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let registry = BoardRegistry::scan(&config.templates_dir)?;
    let tree = FirmwareTree::new(config.firmware_dir.clone());

    if json {
        let boards: Vec<_> = registry
            .boards()
            .map(|board| {
                serde_json::json!({
                    "name": board.name,
                    "template": board.template.is_some(),
                    "in_tree": tree.has_board(&board.name),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&boards)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("Boards ({}):", registry.len());
    println!("{:<32}  {:<10}  {}", "NAME", "TEMPLATE", "IN TREE");
    println!("{}", "-".repeat(56));
    for board in registry.boards() {
        println!(
            "{:<32}  {:<10}  {}",
            board.name,
            yes_no(board.template.is_some()),
            yes_no(tree.has_board(&board.name))
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn keymap(
    config: &Config,
    layout: &Path,
    output: Option<&Path>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let registry = BoardRegistry::scan(&config.templates_dir)?;
    let request = read_layout(layout)?;
    request.layers.validate()?;

    let board = registry.resolve(&request.properties)?;
    let source = registry.assemble(board, &request.layers)?;

    match output {
        Some(path) => {
            std::fs::write(path, &source)?;
            info!(path = %path.display(), board = %board, "Wrote keymap");
        }
        None => print!("{source}"),
    }

    Ok(ExitCode::SUCCESS)
}

async fn build(
    config: Config,
    layout: &Path,
    output: Option<PathBuf>,
    timeout: Option<Duration>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let request = read_layout(layout)?;
    let queue = JobQueue::open(&config)?;

    let handle = queue.submit(request.properties, request.layers)?;
    debug!(job_id = %handle.id(), "Submitted build");

    let waited = timeout.unwrap_or_else(|| config.compile_timeout());
    let outcome = match timeout {
        Some(timeout) => queue.result(&handle, timeout).await,
        None => queue.wait(&handle).await,
    };

    let code = match outcome {
        JobOutcome::Complete(result) => match result.as_ref() {
            BuildResult::Success {
                artifact,
                file_name,
                ..
            } => {
                let path = output.unwrap_or_else(|| PathBuf::from(file_name));
                std::fs::write(&path, artifact)?;
                println!("{} -> {}", result, path.display());
                ExitCode::SUCCESS
            }
            failed => {
                if let Some(output) = failed.output() {
                    eprint!("{output}");
                }
                eprintln!("{failed}");
                ExitCode::FAILURE
            }
        },
        JobOutcome::Pending => {
            eprintln!(
                "build did not finish within {}s (job {})",
                waited.as_secs(),
                handle.id()
            );
            // Dropping the runtime kills the running toolchain.
            return Ok(ExitCode::from(2));
        }
    };

    queue.shutdown().await;
    Ok(code)
}

fn read_layout(path: &Path) -> Result<BuildRequest, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read layout '{}': {}", path.display(), e))?;
    Ok(BuildRequest::from_upload_json(&text)?)
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
