// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-connection idle watchdog: a connection that goes quiet for longer
//! than its timeout is closed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::banks::ConnectionId;

/// Invoked for every connection whose last-fed timestamp has aged past the
/// configured timeout. The default implementation (installed by
/// [`crate::Server`]) removes the connection from the live set and closes
/// it.
pub(crate) type ExpiryCallback = Arc<dyn Fn(ConnectionId) + Send + Sync>;

#[derive(Debug)]
pub(crate) struct Watchdog {
    enabled: bool,
    timeout: Duration,
    last_seen: Mutex<HashMap<ConnectionId, Instant>>,
}

impl Watchdog {
    pub(crate) fn new(enabled: bool, timeout: Duration) -> Self {
        Self {
            enabled,
            timeout,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Resets `connection_id`'s idle clock. A no-op if the watchdog is
    /// disabled.
    pub(crate) fn feed(&self, connection_id: ConnectionId) {
        if !self.enabled {
            return;
        }
        self.last_seen
            .lock()
            .expect("watchdog mutex poisoned")
            .insert(connection_id, Instant::now());
    }

    /// Stops tracking `connection_id`, e.g. once its connection has
    /// already been closed for an unrelated reason.
    pub(crate) fn remove(&self, connection_id: ConnectionId) {
        self.last_seen
            .lock()
            .expect("watchdog mutex poisoned")
            .remove(&connection_id);
    }

    /// Spawns the periodic scanner task. Scans every `timeout / 2` and
    /// invokes `on_expiry` for each connection that has gone silent for at
    /// least `timeout`. A no-op, returning `None`, if the watchdog is
    /// disabled.
    pub(crate) fn start(self: &Arc<Self>, on_expiry: ExpiryCallback) -> Option<JoinHandle<()>> {
        if !self.enabled {
            return None;
        }
        let watchdog = Arc::clone(self);
        let period = watchdog.timeout / 2;
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let expired: Vec<ConnectionId> = {
                    let now = Instant::now();
                    let last_seen = watchdog.last_seen.lock().expect("watchdog mutex poisoned");
                    last_seen
                        .iter()
                        .filter(|(_, seen)| now.duration_since(**seen) >= watchdog.timeout)
                        .map(|(id, _)| *id)
                        .collect()
                };
                for connection_id in expired {
                    on_expiry(connection_id);
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn disabled_watchdog_feed_and_remove_are_noops() {
        let watchdog = Watchdog::new(false, Duration::from_millis(10));
        watchdog.feed(1);
        assert!(watchdog
            .last_seen
            .lock()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn expires_a_connection_that_goes_silent() {
        let watchdog = Arc::new(Watchdog::new(true, Duration::from_millis(40)));
        watchdog.feed(7);
        let expired_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&expired_count);
        let _handle = watchdog.start(Arc::new(move |_id| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(expired_count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn feeding_keeps_a_connection_alive() {
        let watchdog = Arc::new(Watchdog::new(true, Duration::from_millis(40)));
        watchdog.feed(7);
        let expired_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&expired_count);
        let _handle = watchdog.start(Arc::new(move |_id| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            watchdog.feed(7);
        }
        assert_eq!(expired_count.load(Ordering::SeqCst), 0);
    }
}
