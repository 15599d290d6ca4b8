// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Client side of the host-local alarm bus.
//!
//! Producers call [`report`] (or a [`Reporter`] bound to custom paths) to
//! hand one alarm to the broker. Subscribers hold an [`AlarmSubscriber`]
//! and receive every forwarded alarm whose id passes their local filter.
//! Both sides share the fixed-size [`AlarmRecord`] wire format.

pub mod error;
mod frame;
pub mod id_mask;
pub mod paths;
pub mod producer;
pub mod record;
pub mod subscriber;

pub use error::{AlarmError, Result};
pub use id_mask::IdMask;
pub use paths::{
    BusPaths, DEFAULT_RUN_DIR, REPORT_SOCKET_NAME, RUN_DIR_MODE, SOCKET_FILE_MODE,
    SUBSCRIBE_SOCKET_NAME,
};
pub use producer::{Reporter, report};
pub use record::{
    ALARM_ID_SLOTS, AlarmKind, AlarmLevel, AlarmRecord, AlarmTime, FIXED_SIZE, HEADER_BYTES,
    MAX_ALARM_ID, MESSAGE_CAPACITY, MIN_ALARM_ID,
};
pub use subscriber::{AlarmSubscriber, ClientHandle};
