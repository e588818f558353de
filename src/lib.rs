// src/lib.rs

pub mod cli;
pub mod config;
pub mod coord;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod notify;
pub mod registry;
pub mod store;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, StoreSection};
use crate::engine::{Orchestrator, SchedulerLoop, SettingsUpdate};
use crate::notify::LogSink;
use crate::store::open_store;
use crate::types::{format_duration, StoreMode};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the instance store and the orchestrator
/// - instance restore and config seeding
/// - the scheduler loop
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone();
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let store_section = resolve_store_section(&cfg.store, &config_root_dir(&config_path));
    let store = open_store(&store_section);
    let orchestrator = Orchestrator::from_config(&cfg, store, Arc::new(LogSink))?;

    orchestrator.restore()?;
    seed_instances(&orchestrator, &cfg)?;

    let status = orchestrator.get_orchestrator_status();
    info!(
        unit_types = status.total_unit_types,
        instances = status.total_instances,
        "orchestrator ready"
    );

    let orchestrator = Arc::new(orchestrator);
    let mut scheduler = SchedulerLoop::new(Arc::clone(&orchestrator), cfg.orchestrator.tick_interval()?);

    if args.once {
        let report = scheduler.tick();
        info!(dispatched = report.dispatched, "single tick dispatched; waiting for runs");
        scheduler.drain().await;
        return Ok(());
    }

    // Ctrl-C → graceful shutdown.
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("shutdown requested");
            token.cancel();
        });
    }

    scheduler.run(token).await;
    Ok(())
}

/// Create (or reconfigure) every `[[instance]]` from the config.
///
/// Instances restored from the store keep their id, status and history;
/// their settings and auto-run schedule are taken from the config.
pub fn seed_instances(orchestrator: &Orchestrator, cfg: &ConfigFile) -> Result<usize> {
    let default_interval = cfg.orchestrator.default_auto_run_interval()?;
    let mut seeded = 0;

    for seed in &cfg.instance {
        let id = match orchestrator.find_instance(&seed.user, &seed.unit) {
            Some(id) => id,
            None => orchestrator.create_instance(seed.user.clone(), seed.unit.clone(), seed.settings.clone())?,
        };
        let update = SettingsUpdate::new()
            .settings(seed.settings.clone())
            .auto_run(seed.auto_run)
            .auto_run_interval(seed.effective_auto_run_interval(default_interval)?);
        orchestrator.update_settings(id, update)?;
        debug!(instance = %id, user = %seed.user, unit = %seed.unit, "seeded instance");
        seeded += 1;
    }

    Ok(seeded)
}

/// Figure out the directory relative store paths are resolved against.
///
/// - If the config path has a non-empty parent (e.g. "deploy/agentvisor.toml"),
///   we use that directory.
/// - If it's just a bare filename like "agentvisor.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn resolve_store_section(section: &StoreSection, root: &Path) -> StoreSection {
    let mut resolved = section.clone();
    if section.mode == StoreMode::File && section.path.is_relative() {
        resolved.path = root.join(&section.path);
    }
    if section.mode == StoreMode::Memory {
        warn!("using in-memory instance store; state is lost on exit");
    }
    resolved
}

/// Simple dry-run output: print units, rules and seeded instances.
fn print_dry_run(cfg: &ConfigFile) {
    println!("agentvisor dry-run");
    println!("  orchestrator.tick_interval = {}", cfg.orchestrator.tick_interval);
    println!(
        "  orchestrator.default_auto_run_interval = {}",
        cfg.orchestrator.default_auto_run_interval
    );
    println!(
        "  orchestrator.symmetric_conflicts = {}",
        cfg.orchestrator.symmetric_conflicts
    );
    println!("  store.mode = {:?}", cfg.store.mode);
    println!();

    println!("units ({}):", cfg.unit.len());
    for (name, unit) in cfg.unit.iter() {
        println!("  - {name}");
        println!("      kind: {:?}", unit.kind);
        println!("      priority: {}", unit.effective_priority());
        if !unit.depends_on.is_empty() {
            println!("      depends_on: {:?}", unit.depends_on);
        }
        if !unit.conflicts.is_empty() {
            println!("      conflicts: {:?}", unit.conflicts);
        }
        if let Some(cmd) = unit.config.get("cmd").and_then(|v| v.as_str()) {
            println!("      cmd: {cmd}");
        }
    }
    println!();

    println!("instances ({}):", cfg.instance.len());
    let default_interval = cfg.orchestrator.default_auto_run_interval().ok();
    for seed in &cfg.instance {
        let interval = default_interval
            .and_then(|d| seed.effective_auto_run_interval(d).ok())
            .map(format_duration)
            .unwrap_or_else(|| "?".to_string());
        println!(
            "  - {} / {} (auto_run: {}, every {})",
            seed.user, seed.unit, seed.auto_run, interval
        );
    }

    debug!("dry-run complete (no execution)");
}
