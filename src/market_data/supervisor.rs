// =============================================================================
// Reconnect supervisor — owns the durable state and the retry policy
// =============================================================================
//
// One session at a time. When a session ends (clean close or transport error)
// the supervisor waits a fixed delay and starts a fresh session against the
// *same* series, engine and callback, so nothing accumulated before the
// outage is lost. Retries are unbounded; the only way out is the external
// shutdown signal, which interrupts both an active connection wait and the
// backoff wait.
// =============================================================================

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::indicators::IndicatorEngine;

use super::feed::{FeedConnector, FeedSession, Subscription, UpdateFn};
use super::series::BoundedSeries;

// ---------------------------------------------------------------------------
// ConnectionState / ConnectionStatus
// ---------------------------------------------------------------------------

/// Where the supervised connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

/// Externally readable connection status: current state, retry counter and
/// the last failure reason. Shared via `Arc`; the retry counter is
/// observability state only and never gates a retry.
pub struct ConnectionStatus {
    state: RwLock<ConnectionState>,
    retries: AtomicU32,
    last_error: RwLock<Option<String>>,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Connecting),
            retries: AtomicU32::new(0),
            last_error: RwLock::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Reconnect attempts since the last successful open.
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Called by the session the moment it starts streaming: the connection
    /// is Open and the retry counter starts over.
    pub(crate) fn mark_open(&self) {
        *self.state.write() = ConnectionState::Open;
        self.retries.store(0, Ordering::Relaxed);
    }

    fn set_state(&self, next: ConnectionState) {
        *self.state.write() = next;
    }

    /// Record a session end; returns the attempt number for logging.
    fn record_failure(&self, reason: String) -> u32 {
        *self.last_error.write() = Some(reason);
        self.retries.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ReconnectSupervisor
// ---------------------------------------------------------------------------

/// Wraps the session lifecycle in an indefinite fixed-delay retry loop.
///
/// The supervisor owns the window, the indicator engine and the update
/// callback; every session borrows them for exactly its own lifetime. That
/// ownership chain is what makes the series single-writer without locks.
pub struct ReconnectSupervisor<C: FeedConnector> {
    connector: C,
    subscription: Subscription,
    reconnect_delay: Duration,
    series: BoundedSeries,
    engine: IndicatorEngine,
    on_update: UpdateFn,
    status: Arc<ConnectionStatus>,
}

impl<C: FeedConnector> ReconnectSupervisor<C> {
    pub fn new(config: &Config, connector: C, on_update: UpdateFn) -> Self {
        Self {
            connector,
            subscription: config.subscription(),
            reconnect_delay: config.reconnect_delay(),
            series: BoundedSeries::new(config.window_capacity),
            engine: IndicatorEngine::new(config.indicators.clone()),
            on_update,
            status: Arc::new(ConnectionStatus::new()),
        }
    }

    /// Shared handle for observing state / retries / last error from other
    /// tasks.
    pub fn status(&self) -> Arc<ConnectionStatus> {
        Arc::clone(&self.status)
    }

    /// The accumulated window. Mutable access stays private: sessions borrow
    /// it exclusively inside [`run`](Self::run).
    pub fn series(&self) -> &BoundedSeries {
        &self.series
    }

    /// Run sessions until `shutdown` flips to true.
    ///
    /// Both the active session and the backoff wait are raced against the
    /// shutdown signal, so a stop request interrupts either immediately; the
    /// session future (and any socket inside it) is released by drop on that
    /// exit path.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                break;
            }

            self.status.set_state(ConnectionState::Connecting);
            let session = FeedSession::new(
                &self.subscription,
                &mut self.series,
                &self.engine,
                &mut self.on_update,
                &self.status,
            );

            let end = tokio::select! {
                end = session.run(&mut self.connector) => end,
                _ = shutdown.changed() => break,
            };

            let reason = end.reason();
            let attempt = self.status.record_failure(reason.clone());
            self.status.set_state(ConnectionState::Reconnecting);
            warn!(
                reason = %reason,
                attempt,
                delay_secs = self.reconnect_delay.as_secs(),
                "feed session ended -- reconnecting after fixed delay"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.status.set_state(ConnectionState::Closing);
        info!(stream = %self.subscription, "supervisor stopping -- feed closed");
        self.status.set_state(ConnectionState::Closed);
        Ok(())
    }
}
