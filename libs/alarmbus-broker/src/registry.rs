// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Live subscriber connections and the broadcast path.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use mio::Token;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::sockets::SocketIdentity;

/// Token reserved for the listening socket.
pub const LISTENER_TOKEN: Token = Token(0);

/// Attempts made for a backpressured subscriber after the main pass.
pub const SEND_RETRY_ATTEMPTS: usize = 3;

/// Pause before each retry attempt.
pub const SEND_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Bytes examined by the liveness probe.
const PROBE_BYTES: usize = 32;

enum Slot {
    Listener(SocketIdentity),
    Subscriber(UnixStream),
}

/// Counts from one broadcast call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that received the whole frame.
    pub delivered: usize,
    /// Subscribers dropped from the registry (broken, or stalled mid-frame).
    pub removed: usize,
    /// Subscribers that stayed backpressured and missed this frame.
    pub missed: usize,
}

/// Shared map of subscriber connections.
///
/// Cloning shares the same registry. Every mutation and every pass over
/// the connections happens under one lock.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    max_connections: usize,
}

struct RegistryInner {
    slots: HashMap<Token, Slot>,
    next_token: usize,
}

impl RegistryInner {
    fn subscriber_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, Slot::Subscriber(_)))
            .count()
    }

    fn prune_dead(&mut self) -> Vec<Token> {
        let dead: Vec<Token> = self
            .slots
            .iter()
            .filter_map(|(token, slot)| match slot {
                Slot::Subscriber(stream) if !is_alive(stream) => Some(*token),
                _ => None,
            })
            .collect();
        for token in &dead {
            self.slots.remove(token);
        }
        dead
    }

    fn stream(&self, token: Token) -> Option<&UnixStream> {
        match self.slots.get(&token) {
            Some(Slot::Subscriber(stream)) => Some(stream),
            _ => None,
        }
    }
}

impl ConnectionRegistry {
    /// Registry holding only the listener entry for `listener`.
    pub fn new(max_connections: usize, listener: SocketIdentity) -> Self {
        let mut slots = HashMap::new();
        slots.insert(LISTENER_TOKEN, Slot::Listener(listener));
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                slots,
                next_token: LISTENER_TOKEN.0 + 1,
            })),
            max_connections,
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscriber_count()
    }

    /// Identity of the listening socket the registry currently belongs to.
    pub fn listener_identity(&self) -> Option<SocketIdentity> {
        match self.inner.lock().slots.get(&LISTENER_TOKEN) {
            Some(Slot::Listener(identity)) => Some(*identity),
            _ => None,
        }
    }

    /// Add a subscriber, pruning dead ones first when at the cap.
    ///
    /// Returns `None` when the registry is still full; the stream is
    /// dropped, which closes it.
    pub fn admit(&self, stream: UnixStream) -> Option<Token> {
        let mut inner = self.inner.lock();
        if inner.subscriber_count() >= self.max_connections {
            let pruned = inner.prune_dead();
            if !pruned.is_empty() {
                info!("[Registry] Pruned {} dead subscriber(s) to make room", pruned.len());
            }
        }
        if inner.subscriber_count() >= self.max_connections {
            return None;
        }
        let token = Token(inner.next_token);
        inner.next_token += 1;
        inner.slots.insert(token, Slot::Subscriber(stream));
        Some(token)
    }

    /// Probe every subscriber and drop the ones whose peer is gone.
    pub fn prune_dead(&self) -> Vec<Token> {
        self.inner.lock().prune_dead()
    }

    /// Send one encoded record to every subscriber.
    ///
    /// Subscribers that would block are retried after the main pass with
    /// the lock released between attempts, so one slow peer never holds up
    /// delivery to the others.
    pub fn broadcast(&self, frame: &[u8]) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut pending: Vec<(Token, usize)> = Vec::new();

        {
            let mut inner = self.inner.lock();
            let mut broken = Vec::new();
            for (token, slot) in &inner.slots {
                let Slot::Subscriber(stream) = slot else {
                    continue;
                };
                match send_from(stream, frame, 0) {
                    Delivery::Done => report.delivered += 1,
                    Delivery::Blocked(offset) => pending.push((*token, offset)),
                    Delivery::Broken(e) => {
                        debug!("[Registry] Subscriber {} send failed: {}", token.0, e);
                        broken.push(*token);
                    }
                }
            }
            for token in broken {
                inner.slots.remove(&token);
                report.removed += 1;
            }
        }

        for _ in 0..SEND_RETRY_ATTEMPTS {
            if pending.is_empty() {
                break;
            }
            std::thread::sleep(SEND_RETRY_DELAY);

            let mut inner = self.inner.lock();
            let mut broken = Vec::new();
            pending.retain_mut(|(token, offset)| {
                // Gone since the last attempt.
                let Some(stream) = inner.stream(*token) else {
                    return false;
                };
                match send_from(stream, frame, *offset) {
                    Delivery::Done => {
                        report.delivered += 1;
                        false
                    }
                    Delivery::Blocked(sent) => {
                        *offset = sent;
                        true
                    }
                    Delivery::Broken(e) => {
                        debug!("[Registry] Subscriber {} send failed: {}", token.0, e);
                        broken.push(*token);
                        false
                    }
                }
            });
            for token in broken {
                inner.slots.remove(&token);
                report.removed += 1;
            }
        }

        if !pending.is_empty() {
            let mut inner = self.inner.lock();
            for (token, offset) in pending {
                if offset == 0 {
                    warn!("[Registry] Subscriber {} backpressured, alarm not delivered", token.0);
                    report.missed += 1;
                } else if inner.slots.remove(&token).is_some() {
                    // The rest of its stream would be misframed.
                    warn!(
                        "[Registry] Subscriber {} stalled after {} of {} bytes, disconnecting",
                        token.0,
                        offset,
                        frame.len()
                    );
                    report.removed += 1;
                }
            }
        }

        report
    }

    /// Close every subscriber and swap in a new listener entry.
    ///
    /// `rebind` runs under the registry lock, between closing the old
    /// connections and installing the identity it returns. On error the
    /// registry is left without a listener entry.
    pub fn reset_with<T>(
        &self,
        rebind: impl FnOnce() -> Result<(T, SocketIdentity)>,
    ) -> Result<T> {
        let mut inner = self.inner.lock();
        let closed = inner.subscriber_count();
        inner.slots.clear();
        if closed > 0 {
            info!("[Registry] Closed {} subscriber connection(s)", closed);
        }
        let (value, identity) = rebind()?;
        inner.slots.insert(LISTENER_TOKEN, Slot::Listener(identity));
        Ok(value)
    }

    /// Close every subscriber connection, keeping the listener entry.
    pub fn close_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.slots.len();
        inner
            .slots
            .retain(|_, slot| matches!(slot, Slot::Listener(_)));
        before - inner.slots.len()
    }
}

enum Delivery {
    Done,
    /// Would block after `offset` bytes of the frame in total.
    Blocked(usize),
    Broken(io::Error),
}

/// Write `frame[offset..]` without blocking or raising SIGPIPE.
fn send_from(stream: &UnixStream, frame: &[u8], mut offset: usize) -> Delivery {
    while offset < frame.len() {
        let rest = &frame[offset..];
        // SAFETY: the fd is owned by `stream` for the duration of the call
        // and `rest` is a valid readable buffer of the given length.
        let n = unsafe {
            libc::send(
                stream.as_raw_fd(),
                rest.as_ptr().cast(),
                rest.len(),
                libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT,
            )
        };
        if n > 0 {
            offset += n as usize;
            continue;
        }
        if n == 0 {
            return Delivery::Blocked(offset);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => return Delivery::Blocked(offset),
            _ => return Delivery::Broken(err),
        }
    }
    Delivery::Done
}

/// Non-blocking peek: a closed or reset peer is dead, anything else alive.
fn is_alive(stream: &UnixStream) -> bool {
    let mut buf = [0u8; PROBE_BYTES];
    loop {
        // SAFETY: the fd is owned by `stream` and `buf` is writable for
        // its full length.
        let n = unsafe {
            libc::recv(
                stream.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                libc::MSG_PEEK | libc::MSG_DONTWAIT,
            )
        };
        if n > 0 {
            return true;
        }
        if n == 0 {
            return false;
        }
        match io::Error::last_os_error().kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => return true,
            _ => return false,
        }
    }
}
