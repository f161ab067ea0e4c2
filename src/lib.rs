// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod logging;
pub mod node;
pub mod plugin;
mod sync;
pub mod trigger;
pub mod types;

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{default_config_path, load_and_validate};
use crate::engine::TreeHost;
use crate::plugin::{PluginLoader, PluginRegistry};

/// High-level entry point used by `main.rs`.
///
/// Loads and validates the config, builds the tree against the built-in
/// plugin registry, then either prints it (`--dry-run`), evaluates every
/// leaf once (`--once`), or starts all triggers and runs until Ctrl-C.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)?;

    let loader: Arc<dyn PluginLoader> = Arc::new(PluginRegistry::with_builtins());
    let host = Arc::new(TreeHost::build(&cfg, loader)?);

    if args.dry_run {
        print!("{}", host.describe());
        debug!("dry-run complete (no execution)");
        return Ok(());
    }

    if args.once {
        let worker = Arc::clone(&host);
        let results = tokio::task::spawn_blocking(move || worker.run_all_once()).await?;
        for (name, outcome) in results {
            match outcome {
                Some(outcome) => match outcome.payload {
                    Some(payload) => println!("{name}: {} ({payload})", outcome.logical),
                    None => println!("{name}: {}", outcome.logical),
                },
                None => println!("{name}: vetoed"),
            }
        }
        host.shutdown();
        return Ok(());
    }

    host.start()?;
    info!(config = ?config_path, "running; press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    host.shutdown();
    Ok(())
}
