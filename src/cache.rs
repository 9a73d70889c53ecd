//! Freshness-bounded order book cache for one market.
//!
//! Reads go through a staleness gate: once the cached book is older than
//! `update_rate` a refresh is attempted, and once it is older than
//! `market_expiration_time` nothing is served at all. Refresh failures are
//! logged and swallowed; callers only ever see a `Depth` or `None`.
//!
//! The cached book and its timestamp live behind one lock and are always
//! replaced together, whether the writer is a pull refresh or a push
//! listener.
//!
//! After `terminate()` the cache serves nothing (`None`), refuses writes
//! and signals its push listener to stop.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::{CacheSettings, PushTransport};
use crate::errors::{AppError, Result};
use crate::exchange::Exchange;
use crate::models::{Depth, MarketIdentity, RawDepth, Ticker};
use crate::normalizer::normalize;
use crate::push::{self, PushHandle};

/// Mutable part of a cache.
#[derive(Debug, Clone)]
pub struct CacheState {
    pub depth: Depth,
    /// Seconds since the epoch of the last accepted write; 0 means never.
    pub last_updated: f64,
    pub terminated: bool,
}

impl Default for CacheState {
    fn default() -> Self {
        Self {
            depth: Depth::placeholder(),
            last_updated: 0.0,
            terminated: false,
        }
    }
}

/// Handle to the state of one cache. Clones refer to the same state.
#[derive(Debug, Clone, Default)]
pub struct SharedDepth {
    state: Arc<RwLock<CacheState>>,
}

impl SharedDepth {
    /// Depth and the time it was written, read atomically.
    pub fn snapshot(&self) -> (Depth, f64) {
        let state = self.state.read();
        (state.depth.clone(), state.last_updated)
    }

    pub fn last_updated(&self) -> f64 {
        self.state.read().last_updated
    }

    pub fn is_terminated(&self) -> bool {
        self.state.read().terminated
    }

    /// Replace the whole book. Refused once terminated.
    pub fn commit(&self, depth: Depth, at: f64) -> bool {
        let mut state = self.state.write();
        if state.terminated {
            return false;
        }
        state.depth = depth;
        state.last_updated = at;
        true
    }

    /// Returns whether the state was already terminated.
    fn terminate(&self) -> bool {
        std::mem::replace(&mut self.state.write().terminated, true)
    }
}

/// Write side handed to push listeners.
#[derive(Debug, Clone)]
pub struct DepthSink {
    market: String,
    shared: SharedDepth,
}

impl DepthSink {
    pub fn market(&self) -> &str {
        &self.market
    }

    /// Normalize a pushed book and store it with the source's timestamp.
    pub fn ingest(&self, raw: &RawDepth, timestamp: f64) -> Result<()> {
        let depth = normalize(&raw.bids, &raw.asks)
            .map_err(|e| AppError::Ingestion(format!("unusable depth payload: {e}")))?;
        if self.shared.commit(depth, timestamp) {
            Ok(())
        } else {
            Err(AppError::Terminated(self.market.clone()))
        }
    }
}

/// Depth cache for one market, backed by an `Exchange` for pull refreshes.
pub struct DepthCache<E> {
    identity: MarketIdentity,
    settings: CacheSettings,
    exchange: E,
    shared: SharedDepth,
    clock: Arc<dyn Clock>,
    shutdown: watch::Sender<bool>,
    /// Serializes pull refreshes so one fetch is in flight at a time.
    refresh_gate: Mutex<()>,
}

impl<E: Exchange> DepthCache<E> {
    pub fn new(identity: MarketIdentity, settings: CacheSettings, exchange: E) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            identity,
            settings,
            exchange,
            shared: SharedDepth::default(),
            clock: Arc::new(SystemClock),
            shutdown,
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn identity(&self) -> &MarketIdentity {
        &self.identity
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    pub fn last_updated(&self) -> f64 {
        self.shared.last_updated()
    }

    /// Seconds since the last accepted write.
    pub fn age(&self) -> f64 {
        self.clock.now() - self.shared.last_updated()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    /// One-way shutdown: stops refreshes, refuses writes, stops listeners.
    pub fn terminate(&self) {
        if !self.shared.terminate() {
            info!(market = %self.identity.name, "[DEPTH] market terminated");
        }
        self.shutdown.send_replace(true);
    }

    /// Receiver that flips to `true` on `terminate()`.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn sink(&self) -> DepthSink {
        DepthSink {
            market: self.identity.name.clone(),
            shared: self.shared.clone(),
        }
    }

    /// Current depth, refreshed if due; `None` when it cannot be vouched for.
    pub async fn get_depth(&self) -> Option<Depth> {
        if self.is_terminated() {
            debug!(market = %self.identity.name, "[DEPTH] terminated, no depth served");
            return None;
        }

        if self.is_due() {
            let _gate = self.refresh_gate.lock().await;
            // another caller may have refreshed while we waited
            if self.is_due() {
                debug!(market = %self.identity.name, "[DEPTH] should update...");
                self.refresh_locked().await;
            }
        }

        let (depth, last_updated) = self.shared.snapshot();
        let age = self.clock.now() - last_updated;
        if age > self.settings.market_expiration_time.as_secs_f64() {
            debug!(
                market = %self.identity.name,
                age,
                "[DEPTH] order book is expired"
            );
            return None;
        }
        Some(depth)
    }

    /// Pull a fresh book from the exchange. Never fails outward: errors are
    /// logged and leave the cache untouched.
    pub async fn refresh(&self) -> bool {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    fn is_due(&self) -> bool {
        self.age() > self.settings.update_rate.as_secs_f64()
    }

    async fn refresh_locked(&self) -> bool {
        if self.is_terminated() {
            return false;
        }
        match self.fetch_depth().await {
            Ok(depth) => {
                let stored = self.shared.commit(depth, self.clock.now());
                if !stored {
                    debug!(market = %self.identity.name, "[DEPTH] terminated during refresh");
                }
                stored
            }
            Err(e) => {
                error!(market = %self.identity.name, error = %e, "[DEPTH] can't update market");
                false
            }
        }
    }

    async fn fetch_depth(&self) -> Result<Depth> {
        let timeout = self.settings.request_timeout;
        let raw = tokio::time::timeout(timeout, self.exchange.update_depth())
            .await
            .map_err(|_| AppError::Timeout(timeout))??;
        normalize(&raw.bids, &raw.asks)
    }

    /// Best ask and bid of the current depth; `None` whenever `get_depth` is.
    pub async fn get_ticker(&self) -> Option<Ticker> {
        self.get_depth().await.map(|depth| Ticker::from_depth(&depth))
    }

    /// Store a pushed book, bypassing the staleness gate.
    pub fn ingest(&self, raw: &RawDepth, timestamp: f64) -> Result<()> {
        self.sink().ingest(raw, timestamp)
    }

    /// Start the configured push transport as a background task.
    ///
    /// Returns `Ok(None)` when no transport is configured. The task runs
    /// until `terminate()` is called.
    pub async fn spawn_push_listener(
        &self,
        transport: &PushTransport,
    ) -> Result<Option<PushHandle>> {
        if self.is_terminated() {
            return Err(AppError::Terminated(self.identity.name.clone()));
        }
        match transport {
            PushTransport::None => Ok(None),
            PushTransport::Bus { port } => {
                let relay =
                    push::BusRelay::bind(*port, &self.identity.name, self.shutdown_signal())
                        .await?;
                Ok(Some(PushHandle::spawn_bus(relay)?))
            }
            PushTransport::Socket(settings) => {
                let listener = push::SocketListener::new(
                    settings.clone(),
                    self.identity.depth_event.clone(),
                    self.sink(),
                    self.shutdown_signal(),
                )?;
                Ok(Some(PushHandle::spawn_socket(listener)))
            }
        }
    }
}
