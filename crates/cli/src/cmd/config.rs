//! Print or validate configuration

use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;
use watcher::WatcherConfig;

pub fn run(check: Option<&Path>) -> Result<()> {
    let Some(path) = check else {
        print!("{}", WatcherConfig::example_toml());
        return Ok(());
    };

    match WatcherConfig::load(path) {
        Ok(_) => {
            println!("{} {}", "✓".green(), path.display());
            Ok(())
        }
        Err(e) => {
            println!("{} {}: {}", "✗".red(), path.display(), e);
            anyhow::bail!("Invalid configuration")
        }
    }
}
