// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Error types for alarm bus clients.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the record codec and the producer/subscriber clients.
#[derive(Debug, Error)]
pub enum AlarmError {
    /// Alarm id outside the 128-slot id space.
    #[error("alarm id {0} outside 1001..=1128")]
    InvalidId(u16),

    /// Alarm level code outside {1, 2, 3}.
    #[error("invalid alarm level {0}")]
    InvalidLevel(u8),

    /// Alarm kind code outside {1, 2}.
    #[error("invalid alarm kind {0}")]
    InvalidKind(u8),

    /// Message does not fit the fixed-width message field.
    #[error("alarm message is {len} bytes, capacity is {capacity}")]
    MessageTooLong { len: usize, capacity: usize },

    /// A buffer handed to the decoder was not exactly one record long.
    #[error("alarm frame is {actual} bytes, expected {expected}")]
    FrameLength { expected: usize, actual: usize },

    /// The datagram write carried fewer bytes than one record.
    #[error("short send: {sent} of {expected} bytes")]
    ShortSend { sent: usize, expected: usize },

    /// The broker's rendezvous directory or socket file is missing.
    #[error("alarm broker not running ({} missing)", path.display())]
    BrokerNotRunning { path: PathBuf },

    /// A subscription filter did not have exactly one entry per id slot.
    #[error("id filter has {len} entries, expected 128")]
    InvalidFilter { len: usize },

    /// `register` was called while a registration is live.
    #[error("alarm subscriber already registered")]
    AlreadyRegistered,

    /// An operation that needs a live registration found none.
    #[error("alarm subscriber not registered")]
    NotRegistered,

    /// A handle that does not belong to the live registration.
    #[error("unknown client handle {0}")]
    InvalidHandle(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for alarm bus client operations.
pub type Result<T> = std::result::Result<T, AlarmError>;
