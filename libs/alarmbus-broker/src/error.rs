// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Error types for the alarm broker.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Failed to read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A config value outside what the broker can run with.
    #[error("Invalid config value for {key}: {reason}")]
    ConfigValue { key: &'static str, reason: String },

    /// Something other than a socket or directory sits at a rendezvous path.
    #[error("{} is in the way of a rendezvous point", path.display())]
    PathInUse { path: PathBuf },

    #[error("Failed to bind {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
