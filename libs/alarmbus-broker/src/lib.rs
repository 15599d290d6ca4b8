// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Alarm bus broker.
//!
//! Producers send fixed-size alarm records as datagrams to the report
//! socket; the broker filters them by id and pushes the identical bytes to
//! every subscriber connected on the subscribe socket. A supervisor thread
//! keeps both socket files in place and rebuilds them when they are
//! removed or replaced.

mod accept;
mod broker;
pub mod config;
pub mod error;
pub mod filter;
mod ingest;
mod janitor;
pub mod registry;
mod sockets;
mod supervisor;

pub use broker::{Broker, BrokerHandle};
pub use config::{BrokerConfig, BrokerSettings, DEFAULT_CONFIG_PATH};
pub use error::{BrokerError, Result};
pub use filter::FilterTable;
pub use registry::{BroadcastReport, ConnectionRegistry};
pub use sockets::SocketIdentity;

/// Broker version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
