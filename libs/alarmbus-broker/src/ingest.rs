// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Datagram ingest loop.
//!
//! Receives one record per datagram on the report socket, drops anything
//! malformed or filtered out, and broadcasts the original bytes of every
//! accepted record. Records are broadcast in the order they are read.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use alarmbus_client::{AlarmRecord, FIXED_SIZE};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use mio::net::UnixDatagram;
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::filter::FilterTable;
use crate::registry::ConnectionRegistry;
use crate::sockets::{self, SocketIdentity};

const INGEST_TOKEN: Token = Token(0);
const WAKE_TOKEN: Token = Token(1);

/// Datagrams handled per wakeup before commands are looked at again.
const MAX_DATAGRAMS_PER_WAKE: usize = 64;

enum IngestCommand {
    /// Rebuild the report socket if its file is still missing or foreign.
    Rebuild,
    Stop,
}

/// Cloneable control handle for the ingest thread.
#[derive(Clone)]
pub(crate) struct IngestControl {
    commands: Sender<IngestCommand>,
    waker: Arc<Waker>,
    identity: Arc<Mutex<Option<SocketIdentity>>>,
}

impl IngestControl {
    /// Identity of the report socket currently bound, if any.
    pub(crate) fn identity(&self) -> Option<SocketIdentity> {
        *self.identity.lock()
    }

    pub(crate) fn request_rebuild(&self) {
        self.send(IngestCommand::Rebuild);
    }

    fn send(&self, command: IngestCommand) {
        if self.commands.send(command).is_err() {
            // Thread already gone.
            return;
        }
        if let Err(e) = self.waker.wake() {
            warn!("[Ingest] Failed to wake ingest thread: {}", e);
        }
    }
}

pub(crate) struct IngestLoop {
    control: IngestControl,
    thread: Option<JoinHandle<()>>,
}

impl IngestLoop {
    /// Bind the report socket and start the ingest thread.
    pub(crate) fn spawn(
        path: PathBuf,
        filter: FilterTable,
        registry: ConnectionRegistry,
        poll_timeout: Duration,
    ) -> crate::Result<Self> {
        let poll = Poll::new()?;
        let (mut socket, identity) = sockets::bind_datagram(&path)?;
        poll.registry()
            .register(&mut socket, INGEST_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let identity = Arc::new(Mutex::new(Some(identity)));

        let worker = IngestWorker {
            poll,
            path,
            socket: Some(socket),
            identity: Arc::clone(&identity),
            commands: command_rx,
            filter,
            registry,
            poll_timeout,
            buf: vec![0u8; FIXED_SIZE + 1],
        };
        let thread = std::thread::Builder::new()
            .name("alarm-ingest".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            control: IngestControl {
                commands,
                waker,
                identity,
            },
            thread: Some(thread),
        })
    }

    pub(crate) fn control(&self) -> IngestControl {
        self.control.clone()
    }

    /// Stop the thread and wait for it; the report socket closes with it.
    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.control.send(IngestCommand::Stop);
        if thread.join().is_err() {
            error!("[Ingest] Ingest thread panicked");
        }
    }
}

impl Drop for IngestLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct IngestWorker {
    poll: Poll,
    path: PathBuf,
    socket: Option<UnixDatagram>,
    identity: Arc<Mutex<Option<SocketIdentity>>>,
    commands: Receiver<IngestCommand>,
    filter: FilterTable,
    registry: ConnectionRegistry,
    poll_timeout: Duration,
    buf: Vec<u8>,
}

impl IngestWorker {
    fn run(mut self) {
        debug!("[Ingest] Ingest loop started on {}", self.path.display());
        let mut events = Events::with_capacity(16);
        let mut backlog = false;
        loop {
            // A capped drain leaves datagrams queued without a new edge.
            let timeout = if backlog { Duration::ZERO } else { self.poll_timeout };
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!("[Ingest] Poll failed, ingest loop exiting: {}", e);
                break;
            }
            if !self.handle_commands() {
                break;
            }
            if backlog || events.iter().any(|event| event.token() == INGEST_TOKEN) {
                backlog = self.drain();
            }
        }
        debug!("[Ingest] Ingest loop stopped");
    }

    /// Apply queued commands. Returns false when asked to stop.
    fn handle_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(IngestCommand::Rebuild) => self.rebuild(),
                Ok(IngestCommand::Stop) | Err(TryRecvError::Disconnected) => return false,
                Err(TryRecvError::Empty) => return true,
            }
        }
    }

    /// Receive until the socket is empty or the per-wake cap is hit.
    /// Returns true when datagrams may still be queued.
    fn drain(&mut self) -> bool {
        let Some(socket) = self.socket.as_ref() else {
            return false;
        };
        for _ in 0..MAX_DATAGRAMS_PER_WAKE {
            match socket.recv(&mut self.buf) {
                Ok(len) => forward(&self.buf[..len], &self.filter, &self.registry),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return false,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("[Ingest] Receive failed: {}", e);
                    return false;
                }
            }
        }
        true
    }

    fn rebuild(&mut self) {
        let current = *self.identity.lock();
        if !sockets::check_socket(&self.path, current).needs_rebuild() {
            return;
        }

        if let Some(mut old) = self.socket.take() {
            if let Err(e) = self.poll.registry().deregister(&mut old) {
                debug!("[Ingest] Deregister of old report socket failed: {}", e);
            }
        }
        *self.identity.lock() = None;

        let (mut socket, identity) = match sockets::bind_datagram(&self.path) {
            Ok(bound) => bound,
            Err(e) => {
                error!("[Ingest] Failed to rebuild report socket: {}", e);
                return;
            }
        };
        if let Err(e) = self
            .poll
            .registry()
            .register(&mut socket, INGEST_TOKEN, Interest::READABLE)
        {
            error!("[Ingest] Failed to register rebuilt report socket: {}", e);
            return;
        }
        self.socket = Some(socket);
        *self.identity.lock() = Some(identity);
        info!("[Ingest] Rebuilt report socket {}", self.path.display());
    }
}

/// Validate one datagram and broadcast it if the filter lets it through.
fn forward(datagram: &[u8], filter: &FilterTable, registry: &ConnectionRegistry) {
    if datagram.len() != FIXED_SIZE {
        debug!(
            "[Ingest] Dropping datagram of {} bytes, expected {}",
            datagram.len(),
            FIXED_SIZE
        );
        return;
    }
    let record = match AlarmRecord::decode(datagram).and_then(|r| r.validate().map(|()| r)) {
        Ok(record) => record,
        Err(e) => {
            debug!("[Ingest] Dropping malformed alarm: {}", e);
            return;
        }
    };
    if !filter.allows(record.id()) {
        debug!("[Ingest] Alarm {} filtered out", record.id());
        return;
    }

    info!("[Ingest] {}", record);
    let report = registry.broadcast(datagram);
    debug!(
        "[Ingest] Alarm {} delivered to {} subscriber(s), {} removed, {} missed",
        record.id(),
        report.delivered,
        report.removed,
        report.missed
    );
}
