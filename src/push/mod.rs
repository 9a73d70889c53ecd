//! Push ingestion: transports that deliver depth without being asked.
//!
//! • `bus` relays raw depth frames between TCP peers and in-process
//!   subscribers. It does not write into a cache.
//! • `socket` subscribes to a market event over a websocket and writes each
//!   pushed book straight into the cache.
//!
//! Both run as a spawned task that exits once the owning cache is
//! terminated (or dropped).

use std::net::SocketAddr;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::errors::Result;
use crate::models::RawDepth;

pub mod bus;
pub mod socket;

pub use bus::BusRelay;
pub use socket::{PushedDepth, SocketListener, parse_frame};

/// Resolves once shutdown is signalled or the signalling side is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// A running push listener.
#[derive(Debug)]
pub struct PushHandle {
    task: JoinHandle<()>,
    relay: Option<broadcast::Sender<RawDepth>>,
    local_addr: Option<SocketAddr>,
}

impl PushHandle {
    pub(crate) fn spawn_bus(relay: BusRelay) -> Result<Self> {
        let local_addr = relay.local_addr()?;
        let sender = relay.sender();
        Ok(Self {
            task: tokio::spawn(relay.run()),
            relay: Some(sender),
            local_addr: Some(local_addr),
        })
    }

    pub(crate) fn spawn_socket(listener: SocketListener) -> Self {
        Self {
            task: tokio::spawn(listener.run()),
            relay: None,
            local_addr: None,
        }
    }

    /// In-process feed of relayed frames (bus transport only).
    pub fn subscribe(&self) -> Option<broadcast::Receiver<RawDepth>> {
        self.relay.as_ref().map(broadcast::Sender::subscribe)
    }

    /// Address the bus relay is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to exit; only returns after termination.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "[PUSH] listener task failed");
        }
    }
}
