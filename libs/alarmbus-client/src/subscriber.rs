// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Subscriber side of the alarm bus.
//!
//! An [`AlarmSubscriber`] owns at most one live registration: a persistent
//! stream connection to the broker plus a background thread that reads
//! whole records off it, checks them against the local id filter and hands
//! them to the registered callback.

use std::io::ErrorKind;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{AlarmError, Result};
use crate::frame::{FrameReader, ReadStatus};
use crate::id_mask::IdMask;
use crate::paths::BusPaths;
use crate::record::AlarmRecord;

/// Back-off while the broker has nothing for us.
const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Identifies a live registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(u32);

impl ClientHandle {
    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Owner of this process's alarm subscription.
///
/// `register` fails with [`AlarmError::AlreadyRegistered`] while a
/// registration is live; `unregister` tears it down so a later `register`
/// can succeed again. Dropping the subscriber unregisters.
pub struct AlarmSubscriber {
    paths: BusPaths,
    registration: Option<ClientRegistration>,
    next_handle: u32,
}

struct ClientRegistration {
    handle: ClientHandle,
    filter: Arc<RwLock<IdMask>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    // Kept so the connection lives exactly as long as the registration.
    _connection: UnixStream,
}

impl AlarmSubscriber {
    pub fn new(paths: BusPaths) -> Self {
        Self {
            paths,
            registration: None,
            next_handle: 0,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Whether the receive thread is still running.
    ///
    /// Turns false when the broker closes the connection (shutdown, socket
    /// rebuild, connection limit) even though the registration stays live
    /// until `unregister`.
    pub fn is_receiving(&self) -> bool {
        self.registration
            .as_ref()
            .and_then(|r| r.thread.as_ref())
            .is_some_and(|t| !t.is_finished())
    }

    /// Connect to the broker and start dispatching alarms.
    ///
    /// `id_filter` holds one flag per id slot (index 0 is id 1001) and must
    /// have exactly 128 entries. `callback` runs on the receive thread, so
    /// it should return quickly: a slow callback delays this subscriber's
    /// later alarms.
    pub fn register<F>(&mut self, callback: F, id_filter: &[bool]) -> Result<ClientHandle>
    where
        F: FnMut(&AlarmRecord) + Send + 'static,
    {
        if self.registration.is_some() {
            return Err(AlarmError::AlreadyRegistered);
        }
        let mask = IdMask::from_flags(id_filter)?;

        let connection = UnixStream::connect(self.paths.subscribe_socket())?;
        connection.set_nonblocking(true)?;
        let reader = connection.try_clone()?;

        let filter = Arc::new(RwLock::new(mask));
        let stop = Arc::new(AtomicBool::new(false));
        let receive_loop = ReceiveLoop {
            reader: FrameReader::new(reader),
            filter: Arc::clone(&filter),
            stop: Arc::clone(&stop),
            callback,
        };
        let thread = std::thread::Builder::new()
            .name("alarm-recv".to_string())
            .spawn(move || receive_loop.run())?;

        let handle = ClientHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.registration = Some(ClientRegistration {
            handle,
            filter,
            stop,
            thread: Some(thread),
            _connection: connection,
        });

        info!("[Subscriber] Registered client {} ({} ids)", handle.0, mask.len());
        Ok(handle)
    }

    /// Replace the local id filter of a live registration.
    pub fn update_filter(&self, handle: ClientHandle, id_filter: &[bool]) -> Result<()> {
        let registration = self.live(handle)?;
        let mask = IdMask::from_flags(id_filter)?;
        *registration.filter.write() = mask;
        debug!("[Subscriber] Client {} filter updated ({} ids)", handle.0, mask.len());
        Ok(())
    }

    /// Stop the receive thread, close the connection and clear the
    /// registration.
    pub fn unregister(&mut self, handle: ClientHandle) -> Result<()> {
        self.live(handle)?;
        if let Some(registration) = self.registration.take() {
            registration.shutdown();
        }
        info!("[Subscriber] Unregistered client {}", handle.0);
        Ok(())
    }

    fn live(&self, handle: ClientHandle) -> Result<&ClientRegistration> {
        let registration = self.registration.as_ref().ok_or(AlarmError::NotRegistered)?;
        if registration.handle != handle {
            return Err(AlarmError::InvalidHandle(handle.0));
        }
        Ok(registration)
    }
}

impl Default for AlarmSubscriber {
    fn default() -> Self {
        Self::new(BusPaths::default())
    }
}

impl Drop for AlarmSubscriber {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            registration.shutdown();
        }
    }
}

impl ClientRegistration {
    fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("[Subscriber] Receive thread for client {} panicked", self.handle.0);
            }
        }
    }
}

struct ReceiveLoop<F> {
    reader: FrameReader<UnixStream>,
    filter: Arc<RwLock<IdMask>>,
    stop: Arc<AtomicBool>,
    callback: F,
}

impl<F> ReceiveLoop<F>
where
    F: FnMut(&AlarmRecord),
{
    fn run(mut self) {
        debug!("[Subscriber] Receive thread started");
        while !self.stop.load(Ordering::Acquire) {
            match self.reader.read_some() {
                Ok(ReadStatus::Complete) => self.dispatch(),
                Ok(ReadStatus::Partial) => {}
                Ok(ReadStatus::Closed) => {
                    if self.reader.pending() > 0 {
                        debug!(
                            "[Subscriber] Discarding {} bytes of an unfinished frame",
                            self.reader.pending()
                        );
                    }
                    info!(
                        "[Subscriber] Connection closed by broker \
                         (service stopped, socket rebuilt or connection limit reached)"
                    );
                    break;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(RECV_RETRY_DELAY),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset
                            | ErrorKind::ConnectionAborted
                            | ErrorKind::BrokenPipe
                    ) =>
                {
                    warn!("[Subscriber] Connection lost: {}", e);
                    break;
                }
                Err(e) => {
                    error!("[Subscriber] Receive failed: {}", e);
                    break;
                }
            }
        }
        debug!("[Subscriber] Receive thread exiting");
    }

    fn dispatch(&mut self) {
        let record = match AlarmRecord::decode(self.reader.take_frame()) {
            Ok(record) => record,
            Err(e) => {
                debug!("[Subscriber] Dropping frame: {}", e);
                return;
            }
        };
        if let Err(e) = record.validate() {
            debug!("[Subscriber] Dropping malformed alarm: {}", e);
            return;
        }
        if !self.filter.read().contains(record.id()) {
            return;
        }
        (self.callback)(&record);
    }
}
