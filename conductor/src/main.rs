//! Command-line entry point for the conductor.
//!
//! `build` plans the given design documents and runs every task; `status`
//! prints the persisted status board; `resume` hands guidance to a paused
//! task and runs a short guided cycle.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use conductor::agent::TaskAgent;
use conductor::core::types::Stage;
use conductor::exit_codes;
use conductor::io::config::{ConductorConfig, load_config, write_config};
use conductor::io::oracle::CommandOracle;
use conductor::io::paths::ConductorPaths;
use conductor::io::status_store::StatusStore;
use conductor::io::test_runner::CommandTestRunner;
use conductor::logging;
use conductor::orchestrator::{Orchestrator, RunReport};

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Run oracle-driven build tasks concurrently with resumable guidance"
)]
struct Cli {
    /// Project root holding `.conductor/` and `generated/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `.conductor/config.toml` if missing.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Plan the design documents and run every task.
    Build {
        /// Design documents, concatenated in the order given.
        #[arg(required = true)]
        docs: Vec<PathBuf>,
    },
    /// Print the persisted status of every task.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Resume a task paused for guidance.
    Resume {
        task: String,
        /// Free-text guidance for the next implementation attempt.
        #[arg(short, long)]
        guidance: Option<String>,
        /// The documents the task set was built from.
        #[arg(required = true)]
        docs: Vec<PathBuf>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = ConductorPaths::new(&cli.root);
    match cli.command {
        Command::Init { force } => cmd_init(&paths, force),
        Command::Build { docs } => cmd_build(&paths, &docs),
        Command::Status { json } => cmd_status(&paths, json),
        Command::Resume {
            task,
            guidance,
            docs,
        } => cmd_resume(&paths, &task, guidance.as_deref(), &docs),
    }
}

fn cmd_init(paths: &ConductorPaths, force: bool) -> Result<i32> {
    fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("create {}", paths.state_dir.display()))?;
    fs::create_dir_all(&paths.cache_dir)
        .with_context(|| format!("create {}", paths.cache_dir.display()))?;
    if force || !paths.config_path.exists() {
        write_config(&paths.config_path, &ConductorConfig::default())?;
        println!("wrote {}", paths.config_path.display());
    }
    Ok(exit_codes::OK)
}

fn cmd_build(paths: &ConductorPaths, docs: &[PathBuf]) -> Result<i32> {
    let document = read_documents(docs)?;
    let mut orchestrator = orchestrator(paths)?;
    let report = orchestrator.run(&document)?;
    for outcome in &report.outcomes {
        match &outcome.error {
            Some(err) => println!("{}\t{}\t{}", outcome.name, outcome.stage, err),
            None => println!("{}\t{}", outcome.name, outcome.stage),
        }
    }
    Ok(report_exit_code(&report))
}

fn cmd_status(paths: &ConductorPaths, json: bool) -> Result<i32> {
    let board = StatusStore::new(&paths.status_path).read_all()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&board).context("serialize status")?);
        return Ok(exit_codes::OK);
    }
    if board.is_empty() {
        println!("no status available");
        return Ok(exit_codes::OK);
    }
    for record in board.values() {
        println!(
            "{}\t{}\tretries={}\t{}",
            record.name, record.stage, record.retry_count, record.backend_identity
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_resume(
    paths: &ConductorPaths,
    task: &str,
    guidance: Option<&str>,
    docs: &[PathBuf],
) -> Result<i32> {
    let document = read_documents(docs)?;
    let mut orchestrator = orchestrator(paths)?;
    orchestrator.prepare(&document)?;
    let completed = orchestrator.resume_guided(task, guidance)?;
    if completed {
        println!("{task}\t{}", Stage::Completed);
        return Ok(exit_codes::OK);
    }

    let Some(handle) = orchestrator.get_task(task) else {
        bail!("task {task} disappeared during resume");
    };
    let agent = handle
        .lock()
        .map_err(|_| anyhow::anyhow!("agent {task} lock poisoned"))?;
    println!("{task}\t{}", agent.stage());
    if agent.stage() == Stage::PausedForGuidance {
        println!();
        println!("{}", agent.interactive_prompt()?);
        return Ok(exit_codes::PAUSED);
    }
    Ok(exit_codes::INVALID)
}

fn orchestrator(paths: &ConductorPaths) -> Result<Orchestrator> {
    let config = load_config(&paths.config_path)?;
    let oracle = Arc::new(CommandOracle::new(config.oracle.clone()));
    let test_runner = Arc::new(CommandTestRunner::new(config.test_runner.clone()));
    Orchestrator::new(paths.clone(), config, oracle, test_runner)
}

fn read_documents(docs: &[PathBuf]) -> Result<String> {
    let texts = docs
        .iter()
        .map(|path| read_document(path))
        .collect::<Result<Vec<_>>>()?;
    Ok(texts.join("\n\n"))
}

fn read_document(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read design document {}", path.display()))
}

fn report_exit_code(report: &RunReport) -> i32 {
    if report.count(Stage::Failed) > 0 {
        exit_codes::INVALID
    } else if report.count(Stage::PausedForGuidance) > 0 {
        exit_codes::PAUSED
    } else {
        exit_codes::OK
    }
}
