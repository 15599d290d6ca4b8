// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Filesystem rendezvous points shared by the broker and its clients.

use std::path::{Path, PathBuf};

/// Default directory holding both bus sockets.
pub const DEFAULT_RUN_DIR: &str = "/run/alarmbus";

/// Datagram socket producers write records to.
pub const REPORT_SOCKET_NAME: &str = "report";

/// Stream socket subscribers connect to.
pub const SUBSCRIBE_SOCKET_NAME: &str = "alarm";

/// Owner-only access to the run directory.
pub const RUN_DIR_MODE: u32 = 0o700;

/// Owner read/write on both socket files.
pub const SOCKET_FILE_MODE: u32 = 0o600;

/// Locations of the bus rendezvous points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusPaths {
    run_dir: PathBuf,
}

impl BusPaths {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Ingest address (datagram).
    pub fn report_socket(&self) -> PathBuf {
        self.run_dir.join(REPORT_SOCKET_NAME)
    }

    /// Subscriber address (stream).
    pub fn subscribe_socket(&self) -> PathBuf {
        self.run_dir.join(SUBSCRIBE_SOCKET_NAME)
    }
}

impl Default for BusPaths {
    fn default() -> Self {
        Self::new(DEFAULT_RUN_DIR)
    }
}
