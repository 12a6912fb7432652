// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Modbus slave server: owns the memory banks, the function-code
//! dispatch table, and every listener (TCP, TLS, RTU) feeding the single
//! dispatcher task.

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "tcp")]
pub mod tls;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::banks::{ConnectionId, MemoryBanks};
use crate::dispatcher;
use crate::handlers::{FunctionTable, HandlerFn};
use crate::watchdog::Watchdog;

/// Default channel depth for the request queue feeding the dispatcher.
/// Bounded so a flood of requests applies backpressure to readers rather
/// than growing memory without limit.
const REQUEST_QUEUE_DEPTH: usize = 256;

/// What the live-connection set tracks per connection: enough to let the
/// watchdog force a reader task to stop on expiry, independent of
/// whatever the transport itself is doing.
struct ConnectionHandle {
    shutdown: CancellationToken,
}

/// A Modbus slave server.
///
/// Owns the device's [`MemoryBanks`], the function-code dispatch table,
/// the single request queue feeding the dispatcher task, and every
/// listener (TCP, TLS, RTU) started against it. Clone-free: share a
/// server across tasks via the `Arc<Server>` returned from [`Server::new`].
pub struct Server {
    banks: Mutex<MemoryBanks>,
    function_table: Mutex<FunctionTable>,
    request_tx: mpsc::Sender<dispatcher::Request>,
    dispatcher_handle: Mutex<Option<JoinHandle<()>>>,
    watchdog: Arc<Watchdog>,
    watchdog_handle: Mutex<Option<JoinHandle<()>>>,
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
    next_connection_id: AtomicU64,
    shutdown: CancellationToken,
    listener_tasks: Mutex<Vec<JoinHandle<()>>>,
    serial_tasks: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("watchdog_enabled", &self.watchdog.is_enabled())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Allocates the memory banks, installs the default handlers for
    /// function codes 1, 2, 3, 4, 5, 6, 15 and 16, and starts the
    /// dispatcher task. If `watchdog_enabled`, also starts the idle-
    /// connection scanner with the given `watchdog_timeout`.
    #[must_use]
    pub fn new(watchdog_enabled: bool, watchdog_timeout: Duration) -> Arc<Self> {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let server = Arc::new(Self {
            banks: Mutex::new(MemoryBanks::default()),
            function_table: Mutex::new(FunctionTable::default()),
            request_tx,
            dispatcher_handle: Mutex::new(None),
            watchdog: Arc::new(Watchdog::new(watchdog_enabled, watchdog_timeout)),
            watchdog_handle: Mutex::new(None),
            connections: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
            listener_tasks: Mutex::new(Vec::new()),
            serial_tasks: Mutex::new(JoinSet::new()),
        });

        let dispatcher_task = {
            let server = Arc::clone(&server);
            tokio::spawn(dispatcher::run(server, request_rx))
        };
        *server.dispatcher_handle.lock().expect("server mutex poisoned") = Some(dispatcher_task);

        let watchdog = Arc::clone(&server.watchdog);
        let expiry_server = Arc::clone(&server);
        let watchdog_task = watchdog.start(Arc::new(move |connection_id| {
            expiry_server.disconnect(connection_id);
        }));
        *server.watchdog_handle.lock().expect("server mutex poisoned") = watchdog_task;

        server
    }

    /// Locks and returns the device's memory banks for inspection, e.g.
    /// for an embedding application publishing telemetry.
    pub fn banks(&self) -> MutexGuard<'_, MemoryBanks> {
        self.banks.lock().expect("banks mutex poisoned")
    }

    /// Locks and returns the device's memory banks for mutation. An alias
    /// of [`Server::banks`] kept for call sites that want to signal intent
    /// to write.
    pub fn banks_mut(&self) -> MutexGuard<'_, MemoryBanks> {
        self.banks.lock().expect("banks mutex poisoned")
    }

    /// Replaces the handler for `code`, overriding (or disabling, by
    /// passing `None`) the default behavior for that function code.
    pub fn register_function_handler(&self, code: u8, handler: Option<HandlerFn>) {
        self.function_table
            .lock()
            .expect("server mutex poisoned")
            .set(code, handler);
    }

    pub(crate) fn function_table(&self) -> MutexGuard<'_, FunctionTable> {
        self.function_table.lock().expect("server mutex poisoned")
    }

    pub(crate) fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn request_sender(&self) -> mpsc::Sender<dispatcher::Request> {
        self.request_tx.clone()
    }

    pub(crate) fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a newly accepted connection and returns the token its
    /// reader task should race against its socket read: cancelled either
    /// by [`Server::close`] (shared shutdown) or by the watchdog on idle
    /// expiry.
    pub(crate) fn track_connection(&self, id: ConnectionId) -> CancellationToken {
        let shutdown = self.shutdown.child_token();
        self.connections
            .lock()
            .expect("server mutex poisoned")
            .insert(
                id,
                ConnectionHandle {
                    shutdown: shutdown.clone(),
                },
            );
        self.watchdog.feed(id);
        shutdown
    }

    pub(crate) fn untrack_connection(&self, id: ConnectionId) {
        self.connections
            .lock()
            .expect("server mutex poisoned")
            .remove(&id);
        self.watchdog.remove(id);
    }

    pub(crate) fn track_listener_task(&self, handle: JoinHandle<()>) {
        self.listener_tasks
            .lock()
            .expect("server mutex poisoned")
            .push(handle);
    }

    pub(crate) fn track_serial_task<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.serial_tasks
            .lock()
            .expect("server mutex poisoned")
            .spawn(future);
    }

    /// The watchdog's default expiry action: cancels the idle
    /// connection's token (its reader task is racing a `select!` against
    /// it and exits promptly) and drops it from the live set.
    fn disconnect(&self, connection_id: ConnectionId) {
        log::warn!("watchdog closing idle connection {connection_id}");
        if let Some(handle) = self
            .connections
            .lock()
            .expect("server mutex poisoned")
            .remove(&connection_id)
        {
            handle.shutdown.cancel();
        }
        self.watchdog.remove(connection_id);
    }

    /// Orderly shutdown: cancels the shared shutdown token (stopping all
    /// TCP/TLS accept loops and RTU readers via their `select!` on the
    /// token), waits for every serial reader to exit, aborts the
    /// listener-accept tasks and the dispatcher, and stops the watchdog
    /// scanner.
    pub async fn close(&self) {
        self.shutdown.cancel();

        let mut serial_tasks = std::mem::take(
            &mut *self.serial_tasks.lock().expect("server mutex poisoned"),
        );
        while serial_tasks.join_next().await.is_some() {}

        for handle in self
            .listener_tasks
            .lock()
            .expect("server mutex poisoned")
            .drain(..)
        {
            handle.abort();
        }

        if let Some(handle) = self
            .watchdog_handle
            .lock()
            .expect("server mutex poisoned")
            .take()
        {
            handle.abort();
        }

        if let Some(handle) = self
            .dispatcher_handle
            .lock()
            .expect("server mutex poisoned")
            .take()
        {
            handle.abort();
        }
    }
}
