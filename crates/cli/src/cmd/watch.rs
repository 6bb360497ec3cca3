//! Watch roots and stream change batches to stdout

use super::{load_config, resolve_roots};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use treewatch_core::ChangeKind;
use watcher::{
    ChannelSink, HealthStatus, PathClassifier, SessionId, SessionManager, SessionOutput, SourceKind,
    StaticScope,
};

pub async fn run(
    roots: Vec<PathBuf>,
    config_path: Option<&Path>,
    poll: bool,
    json: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if poll {
        config.source.kind = SourceKind::Poll;
    }
    let roots = resolve_roots(&roots)?;

    let filter = PathClassifier::new(&roots, &config.classifier)
        .context("Failed to build path classifier")?;
    let scope = StaticScope::new(roots.clone(), Arc::new(filter));

    let manager = SessionManager::new(config).context("Invalid configuration")?;
    let (sink, rx) = ChannelSink::new();
    let id = SessionId::generate();
    manager
        .start_session(id.clone(), &scope, Arc::new(sink))
        .context("Failed to start watch session")?;

    if !json {
        eprintln!(
            "{} {} root(s) (session {}), press Ctrl-C to stop",
            "Watching".green().bold(),
            roots.len(),
            id.as_str().dimmed()
        );
    }

    // Drains until every sink is dropped, which happens once the session ends
    let printer = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        for output in rx.iter() {
            let rendered = if json {
                serde_json::to_string(&output).map_err(anyhow::Error::from)
            } else {
                Ok(render(&output))
            };
            let mut out = stdout.lock();
            let written = match rendered {
                Ok(line) => writeln!(out, "{}", line).and_then(|_| out.flush()),
                Err(e) => {
                    tracing::warn!("Failed to encode output: {}", e);
                    Ok(())
                }
            };
            if written.is_err() {
                break;
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    if !json {
        eprintln!("{}", "Stopping...".yellow());
    }
    manager.shutdown().await;
    drop(manager);

    printer.await.context("Output task failed")?;
    Ok(())
}

/// Human-readable form of one session output
fn render(output: &SessionOutput) -> String {
    match output {
        SessionOutput::Batch { events, .. } => events
            .iter()
            .map(|event| {
                let path = event.path.display();
                match event.kind {
                    ChangeKind::Created => format!("{} {}", "+".green(), path),
                    ChangeKind::Changed => format!("{} {}", "~".yellow(), path),
                    ChangeKind::Deleted => format!("{} {}", "-".red(), path),
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        SessionOutput::Renames { pairs, .. } => pairs
            .iter()
            .map(|pair| {
                format!(
                    "{} {} -> {}",
                    "→".cyan(),
                    pair.old_path.display(),
                    pair.new_path.display()
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        SessionOutput::Health { stats, .. } => {
            let status = match stats.status {
                HealthStatus::Healthy => stats.status.to_string().green().to_string(),
                HealthStatus::Recovering | HealthStatus::Degraded => {
                    stats.status.to_string().yellow().to_string()
                }
                HealthStatus::Escalated => stats.status.to_string().red().bold().to_string(),
            };
            format!(
                "{} {} (failures: {}, backoff: {}ms)",
                "health:".dimmed(),
                status,
                stats.consecutive_failures,
                stats.current_backoff_ms
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treewatch_core::{ChangeEvent, RenamePair};

    #[test]
    fn test_render_batch_lists_every_event() {
        let output = SessionOutput::Batch {
            session: SessionId::from("s"),
            events: vec![
                ChangeEvent::created(PathBuf::from("/w/a.txt")),
                ChangeEvent::deleted(PathBuf::from("/w/b.txt")),
            ],
        };
        let rendered = render(&output);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("/w/a.txt"));
        assert!(lines[1].ends_with("/w/b.txt"));
    }

    #[test]
    fn test_render_renames() {
        let output = SessionOutput::Renames {
            session: SessionId::from("s"),
            pairs: vec![RenamePair::new(PathBuf::from("/w/old"), PathBuf::from("/w/new"))],
        };
        assert!(render(&output).ends_with("/w/old -> /w/new"));
    }
}
