//! Treewatch CLI - tw command

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod cmd;

/// Treewatch - reliable change detection for directory trees
#[derive(Parser)]
#[command(name = "tw")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch directories and print change batches until interrupted
    Watch {
        /// Directories to watch
        #[arg(required = true)]
        roots: Vec<PathBuf>,
        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Use the polling source instead of OS notifications
        #[arg(long)]
        poll: bool,
        /// Print one JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Scan directories once and print statistics
    Scan {
        /// Directories to scan
        #[arg(required = true)]
        roots: Vec<PathBuf>,
        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Print every file found
        #[arg(short, long)]
        list: bool,
    },
    /// Print or validate configuration
    Config {
        /// Print a commented example with every default (the default action)
        #[arg(long, conflicts_with = "check")]
        example: bool,
        /// Validate this file
        #[arg(long)]
        check: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.log_file.as_deref())?;

    match cli.command {
        Commands::Watch {
            roots,
            config,
            poll,
            json,
        } => cmd::watch::run(roots, config.as_deref(), poll, json).await,
        Commands::Scan {
            roots,
            config,
            list,
        } => cmd::scan::run(roots, config.as_deref(), list).await,
        Commands::Config { example: _, check } => cmd::config::run(check.as_deref()),
    }
}

/// Logs go to stderr; stdout carries change output
///
/// With a log file, info+ goes to the file and warn+ still reaches stderr.
fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let Some(log_file) = log_file else {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .context("Log file path has no file name")?;
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(file_writer.and(std::io::stderr.with_max_level(tracing::Level::WARN)))
        .init();

    Ok(Some(guard))
}
