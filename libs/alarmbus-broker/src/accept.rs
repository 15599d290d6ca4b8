// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Subscriber accept loop.

use std::io::ErrorKind;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use mio::net::UnixListener;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, warn};

use crate::registry::{ConnectionRegistry, LISTENER_TOKEN};

const WAKE_TOKEN: Token = Token(usize::MAX);

/// Handle to a running accept thread.
///
/// The thread owns the listening socket; the socket closes when the
/// thread exits.
pub(crate) struct AcceptLoop {
    stop: Arc<AtomicBool>,
    waker: Waker,
    thread: Option<JoinHandle<()>>,
}

impl AcceptLoop {
    pub(crate) fn spawn(
        mut listener: UnixListener,
        registry: ConnectionRegistry,
        poll_timeout: Duration,
    ) -> std::io::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        let stop = Arc::new(AtomicBool::new(false));

        let worker = AcceptWorker {
            poll,
            listener,
            registry,
            stop: Arc::clone(&stop),
            poll_timeout,
        };
        let thread = std::thread::Builder::new()
            .name("alarm-accept".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            stop,
            waker,
            thread: Some(thread),
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the thread and block until it has exited.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            // The poll timeout still bounds the wait.
            warn!("[Accept] Failed to wake accept thread: {}", e);
        }
        if thread.join().is_err() {
            error!("[Accept] Accept thread panicked");
        }
    }
}

impl Drop for AcceptLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct AcceptWorker {
    poll: Poll,
    listener: UnixListener,
    registry: ConnectionRegistry,
    stop: Arc<AtomicBool>,
    poll_timeout: Duration,
}

impl AcceptWorker {
    fn run(mut self) {
        debug!("[Accept] Accept loop started");
        let mut events = Events::with_capacity(16);
        // Set when accept failed with connections possibly still queued.
        // No new edge arrives for those, so retry on every poll return.
        let mut retry_accept = false;
        while !self.stop.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(self.poll_timeout)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!("[Accept] Poll failed, accept loop exiting: {}", e);
                break;
            }
            if retry_accept || events.iter().any(|event| event.token() == LISTENER_TOKEN) {
                retry_accept = self.accept_pending();
            }
        }
        debug!("[Accept] Accept loop stopped");
    }

    /// Accept until the backlog is empty. Returns true when accept failed
    /// before the backlog drained and must be retried.
    fn accept_pending(&mut self) -> bool {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return false;
            }
            match self.listener.accept() {
                Ok((stream, _)) => {
                    // SAFETY: `into_raw_fd` hands over sole ownership of a
                    // valid, connected socket fd.
                    let stream = unsafe {
                        std::os::unix::net::UnixStream::from_raw_fd(stream.into_raw_fd())
                    };
                    match self.registry.admit(stream) {
                        Some(token) => info!(
                            "[Accept] Subscriber {} connected ({} active)",
                            token.0,
                            self.registry.subscriber_count()
                        ),
                        None => warn!(
                            "[Accept] Connection limit ({}) reached, rejected subscriber",
                            self.registry.max_connections()
                        ),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("[Accept] Accept failed, retrying: {}", e);
                    return true;
                }
            }
        }
    }
}
