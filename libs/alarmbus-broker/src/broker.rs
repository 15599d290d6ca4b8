// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Broker lifecycle: start every loop, stop them all in order.

use std::thread::JoinHandle;

use alarmbus_client::BusPaths;
use crossbeam_channel::Sender;
use tracing::{error, info};

use crate::accept::AcceptLoop;
use crate::config::BrokerSettings;
use crate::error::Result;
use crate::ingest::{IngestControl, IngestLoop};
use crate::janitor;
use crate::registry::ConnectionRegistry;
use crate::sockets;
use crate::supervisor::Supervisor;

pub struct Broker;

impl Broker {
    /// Bind both rendezvous sockets and start the ingest, accept, janitor
    /// and supervisor threads.
    pub fn start(settings: BrokerSettings) -> Result<BrokerHandle> {
        let BrokerSettings {
            paths,
            filter,
            max_connections,
            supervisor_interval,
            janitor_interval,
            poll_timeout,
        } = settings;

        sockets::ensure_run_dir(paths.run_dir())?;

        let (listener, listener_identity) = sockets::bind_listener(&paths.subscribe_socket())?;
        let registry = ConnectionRegistry::new(max_connections, listener_identity);

        let ingest = IngestLoop::spawn(
            paths.report_socket(),
            filter,
            registry.clone(),
            poll_timeout,
        )?;
        let accept = AcceptLoop::spawn(listener, registry.clone(), poll_timeout)?;

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let janitor = janitor::spawn(registry.clone(), janitor_interval, shutdown_rx.clone())?;
        let supervisor = Supervisor::new(
            paths.clone(),
            registry.clone(),
            ingest.control(),
            accept,
            poll_timeout,
        )
        .spawn(supervisor_interval, shutdown_rx)?;

        info!(
            "[Broker] Listening on {} (report) and {} (subscribe), filter {}, max {} subscribers",
            paths.report_socket().display(),
            paths.subscribe_socket().display(),
            if filter.is_filtering() { "on" } else { "off" },
            max_connections
        );

        Ok(BrokerHandle {
            ingest_control: ingest.control(),
            paths,
            registry,
            ingest: Some(ingest),
            shutdown: Some(shutdown_tx),
            janitor: Some(janitor),
            supervisor: Some(supervisor),
        })
    }
}

/// Running broker. Dropping it shuts the broker down.
pub struct BrokerHandle {
    paths: BusPaths,
    registry: ConnectionRegistry,
    ingest_control: IngestControl,
    ingest: Option<IngestLoop>,
    shutdown: Option<Sender<()>>,
    janitor: Option<JoinHandle<()>>,
    supervisor: Option<JoinHandle<()>>,
}

impl BrokerHandle {
    pub fn paths(&self) -> &BusPaths {
        &self.paths
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.subscriber_count()
    }

    /// Stop every thread, close all subscribers and unlink both sockets.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };
        drop(shutdown);

        // The supervisor stops the accept loop on its way out.
        for (name, thread) in [
            ("supervisor", self.supervisor.take()),
            ("janitor", self.janitor.take()),
        ] {
            if let Some(thread) = thread {
                if thread.join().is_err() {
                    error!("[Broker] {} thread panicked", name);
                }
            }
        }
        let report_identity = self.ingest_control.identity();
        if let Some(ingest) = self.ingest.take() {
            ingest.stop();
        }

        let closed = self.registry.close_all();
        sockets::remove_if_ours(&self.paths.report_socket(), report_identity);
        sockets::remove_if_ours(
            &self.paths.subscribe_socket(),
            self.registry.listener_identity(),
        );
        info!("[Broker] Stopped ({} subscriber connection(s) closed)", closed);
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
