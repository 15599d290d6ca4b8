// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! alarmbus CLI
//!
//! Report one alarm to the broker, or listen and print alarms as they
//! arrive.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use alarmbus_client::{
    ALARM_ID_SLOTS, AlarmKind, AlarmLevel, AlarmRecord, AlarmSubscriber, BusPaths,
    DEFAULT_RUN_DIR, IdMask, MIN_ALARM_ID, Reporter,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::RecvTimeoutError;
use signal_hook::consts::signal::{SIGINT, SIGTERM};

#[derive(Parser)]
#[command(name = "alarmbus")]
#[command(author, version, about = "Alarm bus command-line tool", long_about = None)]
struct Cli {
    /// Directory holding the broker's sockets
    #[arg(long, global = true, env = "ALARMBUS_RUN_DIR", default_value = DEFAULT_RUN_DIR)]
    run_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one alarm to the broker
    Report {
        /// Alarm id (1001-1128)
        #[arg(long)]
        id: u16,

        #[arg(long, value_enum, default_value_t = Level::Minor)]
        level: Level,

        #[arg(long, value_enum, default_value_t = Kind::Occur)]
        kind: Kind,

        /// Alarm message
        message: String,
    },

    /// Print alarms until interrupted
    Listen {
        /// Ids to show, e.g. "1001,1010-1012" (default: all)
        #[arg(long)]
        ids: Option<String>,

        /// Also print each alarm's message
        #[arg(short, long)]
        verbose: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Level {
    Minor,
    Major,
    Critical,
}

impl From<Level> for AlarmLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Minor => AlarmLevel::Minor,
            Level::Major => AlarmLevel::Major,
            Level::Critical => AlarmLevel::Critical,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Occur,
    Recover,
}

impl From<Kind> for AlarmKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Occur => AlarmKind::Occurrence,
            Kind::Recover => AlarmKind::Recovery,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let paths = BusPaths::new(cli.run_dir);
    match cli.command {
        Commands::Report {
            id,
            level,
            kind,
            message,
        } => report(paths, id, level.into(), kind.into(), &message),
        Commands::Listen { ids, verbose } => listen(paths, ids.as_deref(), verbose),
    }
}

fn report(
    paths: BusPaths,
    id: u16,
    level: AlarmLevel,
    kind: AlarmKind,
    message: &str,
) -> Result<()> {
    Reporter::new(paths)
        .try_report(id, level, kind, message)
        .with_context(|| format!("Failed to report alarm {}", id))?;
    println!("reported alarm {} ({} {})", id, level.as_str(), kind.as_str());
    Ok(())
}

fn listen(paths: BusPaths, ids: Option<&str>, verbose: bool) -> Result<()> {
    let mask = match ids {
        Some(list) => IdMask::parse_list(list),
        None => IdMask::all(),
    };
    if mask.is_empty() {
        bail!("no valid alarm ids in {:?}", ids.unwrap_or_default());
    }
    let filter: Vec<bool> = (0..ALARM_ID_SLOTS)
        .map(|slot| mask.contains(MIN_ALARM_ID + slot as u16))
        .collect();

    let stop = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&stop))
            .context("Failed to install signal handler")?;
    }

    let (tx, rx) = crossbeam_channel::unbounded::<AlarmRecord>();
    let mut subscriber = AlarmSubscriber::new(paths.clone());
    let handle = subscriber
        .register(
            move |record: &AlarmRecord| {
                let _ = tx.send(record.clone());
            },
            &filter,
        )
        .with_context(|| {
            format!(
                "Failed to subscribe at {}",
                paths.subscribe_socket().display()
            )
        })?;
    eprintln!("listening on {} ({} ids)", paths.subscribe_socket().display(), mask.len());

    let outcome = loop {
        if stop.load(Ordering::Relaxed) {
            break Ok(());
        }
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(record) => {
                println!("{}", record);
                if verbose {
                    println!("  {}", record.message());
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !subscriber.is_receiving() {
                    break Err(anyhow::anyhow!(
                        "broker closed the connection \
                         (stopped, restarted its socket, or at its connection limit)"
                    ));
                }
            }
            Err(RecvTimeoutError::Disconnected) => break Ok(()),
        }
    };

    subscriber.unregister(handle)?;
    outcome
}
