// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Self-healing of the rendezvous directory and socket files.
//!
//! Every interval the supervisor checks the run directory and both socket
//! files. The report socket is rebuilt by the ingest thread on request.
//! The subscribe socket is rebuilt here, in a fixed order: stop and join
//! the accept thread, then under the registry lock close every subscriber
//! and bind the new listener, then start a fresh accept thread.

use std::thread::JoinHandle;
use std::time::Duration;

use alarmbus_client::BusPaths;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use crate::accept::AcceptLoop;
use crate::ingest::IngestControl;
use crate::registry::ConnectionRegistry;
use crate::sockets::{self, SocketCheck};

pub(crate) struct Supervisor {
    paths: BusPaths,
    registry: ConnectionRegistry,
    ingest: IngestControl,
    accept: Option<AcceptLoop>,
    poll_timeout: Duration,
}

impl Supervisor {
    pub(crate) fn new(
        paths: BusPaths,
        registry: ConnectionRegistry,
        ingest: IngestControl,
        accept: AcceptLoop,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            paths,
            registry,
            ingest,
            accept: Some(accept),
            poll_timeout,
        }
    }

    /// Start the supervisor thread. It owns the accept loop from here on
    /// and stops it when `shutdown` disconnects.
    pub(crate) fn spawn(
        self,
        interval: Duration,
        shutdown: Receiver<()>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("alarm-supervisor".to_string())
            .spawn(move || self.run(interval, shutdown))
    }

    fn run(mut self, interval: Duration, shutdown: Receiver<()>) {
        debug!("[Supervisor] Started, interval {:?}", interval);
        loop {
            match shutdown.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => self.check(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if let Some(accept) = self.accept.take() {
            accept.stop();
        }
        debug!("[Supervisor] Stopped");
    }

    fn check(&mut self) {
        if let Err(e) = sockets::ensure_run_dir(self.paths.run_dir()) {
            warn!(
                "[Supervisor] Run directory {} unusable: {}",
                self.paths.run_dir().display(),
                e
            );
            return;
        }

        let report = self.paths.report_socket();
        match sockets::check_socket(&report, self.ingest.identity()) {
            SocketCheck::Healthy => {}
            SocketCheck::ModeRepaired => {
                info!("[Supervisor] Reset mode of {}", report.display());
            }
            state => {
                warn!(
                    "[Supervisor] Report socket {} {:?}, rebuilding",
                    report.display(),
                    state
                );
                self.ingest.request_rebuild();
            }
        }

        let subscribe = self.paths.subscribe_socket();
        let accept_alive = self.accept.as_ref().is_some_and(AcceptLoop::is_running);
        match sockets::check_socket(&subscribe, self.registry.listener_identity()) {
            SocketCheck::Healthy if accept_alive => {}
            SocketCheck::ModeRepaired if accept_alive => {
                info!("[Supervisor] Reset mode of {}", subscribe.display());
            }
            state => {
                warn!(
                    "[Supervisor] Subscribe socket {} {:?} (accept loop running: {}), rebuilding",
                    subscribe.display(),
                    state,
                    accept_alive
                );
                self.rebuild_listener();
            }
        }
    }

    fn rebuild_listener(&mut self) {
        if let Some(accept) = self.accept.take() {
            accept.stop();
        }

        let path = self.paths.subscribe_socket();
        let listener = match self.registry.reset_with(|| sockets::bind_listener(&path)) {
            Ok(listener) => listener,
            Err(e) => {
                error!("[Supervisor] Failed to rebuild subscribe socket: {}", e);
                return;
            }
        };
        match AcceptLoop::spawn(listener, self.registry.clone(), self.poll_timeout) {
            Ok(accept) => {
                self.accept = Some(accept);
                info!("[Supervisor] Rebuilt subscribe socket {}", path.display());
            }
            Err(e) => error!("[Supervisor] Failed to restart accept loop: {}", e),
        }
    }
}
