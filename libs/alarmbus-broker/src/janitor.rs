// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Periodic pruning of subscribers that went away silently.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info};

use crate::registry::ConnectionRegistry;

/// Start the janitor thread. It exits once `shutdown` disconnects.
pub(crate) fn spawn(
    registry: ConnectionRegistry,
    interval: Duration,
    shutdown: Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("alarm-janitor".to_string())
        .spawn(move || {
            debug!("[Janitor] Started, interval {:?}", interval);
            loop {
                match shutdown.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let pruned = registry.prune_dead();
                        if !pruned.is_empty() {
                            info!(
                                "[Janitor] Pruned {} dead subscriber(s), {} active",
                                pruned.len(),
                                registry.subscriber_count()
                            );
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("[Janitor] Stopped");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sockets::bind_listener;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    #[test]
    fn test_prunes_without_traffic_and_stops_on_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let (_listener, identity) = bind_listener(&dir.path().join("alarm")).unwrap();
        let registry = ConnectionRegistry::new(4, identity);
        let (server, client) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();
        registry.admit(server).unwrap();

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let handle = spawn(registry.clone(), Duration::from_millis(20), shutdown_rx).unwrap();

        drop(client);
        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.subscriber_count() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(registry.subscriber_count(), 0);

        drop(shutdown_tx);
        handle.join().unwrap();
    }
}
