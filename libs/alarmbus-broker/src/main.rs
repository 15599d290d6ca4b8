// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! alarmd - host-local alarm bus broker.

use std::path::{Path, PathBuf};

use alarmbus_broker::{Broker, BrokerConfig};
use anyhow::{Context, Result};
use clap::Parser;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "alarmd")]
#[command(about = "Alarm bus broker: fans alarms out from producers to subscribers")]
#[command(version)]
struct Cli {
    /// Config file (a missing default file means built-in defaults)
    #[arg(long, env = "ALARMD_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the report and subscribe sockets
    #[arg(long)]
    run_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = BrokerConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(run_dir) = cli.run_dir {
        config.paths.run_dir = run_dir;
    }

    let _log_guard = init_logging(config.log.level.as_deref(), config.log.file.as_deref())?;

    info!(
        "[Broker] Starting alarmd v{} (PID: {})",
        alarmbus_broker::VERSION,
        std::process::id()
    );

    let settings = config.settings().context("Invalid config")?;
    let mut signals =
        Signals::new([SIGTERM, SIGINT]).context("Failed to install signal handlers")?;
    let broker = Broker::start(settings).context("Failed to start broker")?;

    if let Some(signal) = signals.forever().next() {
        info!("[Broker] Received signal {}, shutting down", signal);
    }

    broker.shutdown();
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the config level.
fn init_logging(level: Option<&str>, file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level.unwrap_or("info"))
            .with_context(|| format!("Invalid log level {:?}", level))?,
    };

    let Some(file) = file else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        return Ok(None);
    };

    let dir = file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = file
        .file_name()
        .with_context(|| format!("Log file {} has no file name", file.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let (non_blocking, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();
    Ok(Some(guard))
}
