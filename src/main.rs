//! auto-logout CLI entry point.
//!
//! One invocation is one evaluation cycle; run it periodically from
//! launchd. Exit status is zero for any clean outcome (including "not
//! idle" and "user cancelled") and non-zero for cycle failures.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use auto_logout::action::PowerActionExecutor;
use auto_logout::config::Config;
use auto_logout::domain::Outcome;
use auto_logout::engine::EscalationEngine;
use auto_logout::idle::IoregIdleSampler;
use auto_logout::prompt::OsascriptPrompt;
use auto_logout::schedule::PmsetScheduleOracle;
use auto_logout::security::FdesetupProbe;

/// Idle-triggered forced logout for shared macOS workstations.
///
/// Checks input idle time once and, past the configured threshold,
/// offers the user a cancellable countdown before forcing a restart or
/// shutdown.
#[derive(Parser, Debug)]
#[command(name = "auto-logout")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dry-run mode: resolve the decision but log power commands
    /// instead of executing them.
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("auto-logout v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;

    if args.dry_run {
        config.dry_run = true;
    }

    info!(
        "Configuration loaded (threshold={}s, window={}s, dry_run={})",
        config.max_idle_seconds, config.cancel_window_seconds, config.dry_run
    );

    let engine = EscalationEngine::new(
        &config,
        IoregIdleSampler,
        OsascriptPrompt::from_config(&config),
        PmsetScheduleOracle,
        FdesetupProbe,
        PowerActionExecutor::new(config.dry_run),
    );

    match engine.evaluate().await {
        Ok(Outcome::NoAction) => {
            info!("System is not idle");
            Ok(())
        }
        Ok(Outcome::Cancelled) => {
            info!("Auto logout cancelled by user");
            Ok(())
        }
        Ok(Outcome::ActionTaken(action)) => {
            // Normally unreachable on real hardware; the machine is
            // already going down.
            info!("Executed {action}");
            Ok(())
        }
        Err(e) => {
            error!("Evaluation cycle failed: {e:#}");
            Err(e.into())
        }
    }
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("auto_logout={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}
