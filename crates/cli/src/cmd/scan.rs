//! One-shot scan of a set of roots

use super::{load_config, resolve_roots};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use treewatch_core::Snapshot;
use watcher::{PathClassifier, PathFilter, ScanOutcome, ScanRequest, ScanToken, TreeScanner};

pub async fn run(roots: Vec<PathBuf>, config_path: Option<&Path>, list: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let roots = resolve_roots(&roots)?;

    let filter: Arc<dyn PathFilter> = Arc::new(
        PathClassifier::new(&roots, &config.classifier).context("Failed to build path classifier")?,
    );
    let scanner = TreeScanner::new(&config.scan, config.fold_case);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.set_message(format!("Scanning {} root(s)...", roots.len()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let outcome = scanner
        .scan(
            roots.clone(),
            Arc::new(Snapshot::new()),
            ScanRequest::Full,
            filter,
            ScanToken::new(),
        )
        .await;
    spinner.finish_and_clear();

    let (snapshot, stats) = match outcome {
        ScanOutcome::Completed { snapshot, stats } => (snapshot, stats),
        ScanOutcome::Cancelled => anyhow::bail!("Scan was cancelled"),
        ScanOutcome::AlreadyRunning => anyhow::bail!("Another scan holds one of the roots"),
    };

    if list {
        for path in snapshot.paths() {
            println!("{}", path.display());
        }
        println!();
    }

    println!("{}", "Scan Summary".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for root in &roots {
        println!("Root:          {}", root.display().to_string().cyan());
    }
    println!("Directories:   {}", stats.directories);
    println!("Files:         {}", stats.files.to_string().green());
    if stats.errors > 0 {
        println!("Errors:        {}", stats.errors.to_string().yellow());
    }
    println!("Elapsed:       {:.2?}", stats.elapsed);

    Ok(())
}
