// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! One-shot alarm producer.
//!
//! Each report opens an unbound datagram socket, sends one record to the
//! broker's ingest address and closes the socket. Nothing is shared between
//! calls, so unrelated processes can report concurrently.

use std::io::ErrorKind;
use std::os::unix::net::UnixDatagram;

use tracing::{debug, warn};

use crate::error::{AlarmError, Result};
use crate::paths::BusPaths;
use crate::record::{AlarmKind, AlarmLevel, AlarmRecord, FIXED_SIZE};

/// Sends alarms to the broker at a given set of rendezvous paths.
#[derive(Clone, Debug, Default)]
pub struct Reporter {
    paths: BusPaths,
}

impl Reporter {
    pub fn new(paths: BusPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &BusPaths {
        &self.paths
    }

    /// Send one alarm, reporting why it was not sent.
    ///
    /// Fails fast when the broker's rendezvous point is missing; the send
    /// itself never waits for buffer space in the broker's queue.
    pub fn try_report(
        &self,
        id: u16,
        level: AlarmLevel,
        kind: AlarmKind,
        message: &str,
    ) -> Result<()> {
        let run_dir = self.paths.run_dir();
        if !run_dir.is_dir() {
            return Err(AlarmError::BrokerNotRunning {
                path: run_dir.to_path_buf(),
            });
        }
        let report_socket = self.paths.report_socket();
        if !report_socket.exists() {
            return Err(AlarmError::BrokerNotRunning {
                path: report_socket,
            });
        }

        let frame = AlarmRecord::new(id, level, kind, message)?.encode()?;

        let socket = UnixDatagram::unbound()?;
        socket.set_nonblocking(true)?;
        let sent = loop {
            match socket.send_to(&frame, &report_socket) {
                Ok(sent) => break sent,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if sent != FIXED_SIZE {
            return Err(AlarmError::ShortSend {
                sent,
                expected: FIXED_SIZE,
            });
        }

        debug!("[Producer] Reported alarm {} ({} {})", id, level.as_str(), kind.as_str());
        Ok(())
    }

    /// Send one alarm; `false` on any validation or transport failure.
    pub fn report(&self, id: u16, level: AlarmLevel, kind: AlarmKind, message: &str) -> bool {
        match self.try_report(id, level, kind, message) {
            Ok(()) => true,
            Err(e) => {
                warn!("[Producer] Failed to report alarm {}: {}", id, e);
                false
            }
        }
    }
}

/// Send one alarm to the broker at the default rendezvous paths.
pub fn report(id: u16, level: AlarmLevel, kind: AlarmKind, message: &str) -> bool {
    Reporter::default().report(id, level, kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MESSAGE_CAPACITY;

    fn bound_paths() -> (tempfile::TempDir, BusPaths, UnixDatagram) {
        let dir = tempfile::tempdir().unwrap();
        let paths = BusPaths::new(dir.path());
        let ingest = UnixDatagram::bind(paths.report_socket()).unwrap();
        (dir, paths, ingest)
    }

    #[test]
    fn test_report_sends_one_fixed_size_datagram() {
        let (_dir, paths, ingest) = bound_paths();
        let reporter = Reporter::new(paths);

        assert!(reporter.report(
            1002,
            AlarmLevel::Major,
            AlarmKind::Occurrence,
            "disk sda has slow io event"
        ));

        let mut buf = vec![0u8; FIXED_SIZE + 1];
        let len = ingest.recv(&mut buf).unwrap();
        assert_eq!(len, FIXED_SIZE);
        let record = AlarmRecord::decode(&buf[..len]).unwrap();
        assert_eq!(record.id(), 1002);
        assert_eq!(record.level(), Some(AlarmLevel::Major));
        assert_eq!(record.kind(), Some(AlarmKind::Occurrence));
        assert_eq!(record.message(), "disk sda has slow io event");
        assert!(record.time().sec > 0);
    }

    #[test]
    fn test_missing_broker_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = Reporter::new(BusPaths::new(dir.path().join("absent")));
        assert!(matches!(
            reporter.try_report(1001, AlarmLevel::Minor, AlarmKind::Occurrence, "x"),
            Err(AlarmError::BrokerNotRunning { .. })
        ));

        let reporter = Reporter::new(BusPaths::new(dir.path()));
        assert!(matches!(
            reporter.try_report(1001, AlarmLevel::Minor, AlarmKind::Occurrence, "x"),
            Err(AlarmError::BrokerNotRunning { .. })
        ));
        assert!(!reporter.report(1001, AlarmLevel::Minor, AlarmKind::Occurrence, "x"));
    }

    #[test]
    fn test_invalid_alarm_is_not_sent() {
        let (_dir, paths, ingest) = bound_paths();
        ingest.set_nonblocking(true).unwrap();
        let reporter = Reporter::new(paths);

        assert!(!reporter.report(1000, AlarmLevel::Minor, AlarmKind::Occurrence, "x"));
        let long = "m".repeat(MESSAGE_CAPACITY);
        assert!(!reporter.report(1001, AlarmLevel::Minor, AlarmKind::Occurrence, &long));

        let mut buf = vec![0u8; FIXED_SIZE];
        assert_eq!(ingest.recv(&mut buf).unwrap_err().kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn test_stale_socket_file_reports_transport_error() {
        let (_dir, paths, ingest) = bound_paths();
        drop(ingest);
        let reporter = Reporter::new(paths);
        assert!(matches!(
            reporter.try_report(1001, AlarmLevel::Minor, AlarmKind::Occurrence, "x"),
            Err(AlarmError::Io(_))
        ));
    }
}
