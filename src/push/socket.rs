//! Websocket depth subscriber.
//!
//! Frames are text with a one character type tag. Tag `2` carries a JSON
//! envelope `[event_name, {"market", "timestamp", "bids", "asks"}]` with the
//! timestamp in milliseconds; every other tag (heartbeats, acks) is ignored.
//! On connect the listener announces itself with
//! `2["land", {"app": <app id>, "events": [<event>]}]`.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::shutdown_requested;
use crate::cache::DepthSink;
use crate::config::SocketSettings;
use crate::errors::{AppError, Result};
use crate::models::{RawDepth, RawLevel};

const MESSAGE_TAG: char = '2';
const ANNOUNCE_EVENT: &str = "land";
const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct DepthPayload {
    market: String,
    timestamp: f64,
    bids: Vec<RawLevel>,
    asks: Vec<RawLevel>,
}

/// A depth book pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct PushedDepth {
    pub event: String,
    pub market: String,
    /// Source timestamp in milliseconds.
    pub timestamp_ms: f64,
    pub depth: RawDepth,
}

impl PushedDepth {
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_ms / 1000.0
    }
}

/// Decode one text frame. `Ok(None)` for frames that are not messages.
pub fn parse_frame(text: &str) -> Result<Option<PushedDepth>> {
    let Some(body) = text.strip_prefix(MESSAGE_TAG) else {
        return Ok(None);
    };
    if body.trim().is_empty() {
        return Ok(None);
    }
    let (event, payload): (String, DepthPayload) = serde_json::from_str(body)
        .map_err(|e| AppError::Ingestion(format!("bad message frame: {e}")))?;
    Ok(Some(PushedDepth {
        event,
        market: payload.market,
        timestamp_ms: payload.timestamp,
        depth: RawDepth {
            bids: payload.bids,
            asks: payload.asks,
        },
    }))
}

/// Subscription frame sent right after connecting.
pub fn announcement(app_id: &str, event: &str) -> String {
    let body = serde_json::json!([ANNOUNCE_EVENT, { "app": app_id, "events": [event] }]);
    format!("{MESSAGE_TAG}{body}")
}

enum SessionEnd {
    Closed,
    Shutdown,
}

pub struct SocketListener {
    url: Url,
    app_id: String,
    event: String,
    sink: DepthSink,
    shutdown: watch::Receiver<bool>,
}

impl SocketListener {
    pub fn new(
        settings: SocketSettings,
        event: String,
        sink: DepthSink,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        Ok(Self {
            url: settings.url()?,
            app_id: settings.app_id,
            event,
            sink,
            shutdown,
        })
    }

    /// Keep a subscription alive until shutdown, reconnecting with backoff.
    pub async fn run(mut self) {
        let mut backoff = MIN_BACKOFF;
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.session().await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Closed) => {
                    info!(market = %self.sink.market(), "[PUSH] connection closed by server");
                    backoff = MIN_BACKOFF;
                }
                Err(e) => {
                    warn!(market = %self.sink.market(), error = %e, ?backoff, "[PUSH] session failed");
                }
            }
            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        info!(market = %self.sink.market(), "[PUSH] listener stopped");
    }

    async fn session(&mut self) -> Result<SessionEnd> {
        let (ws_stream, _resp) = tokio::select! {
            _ = shutdown_requested(&mut self.shutdown) => return Ok(SessionEnd::Shutdown),
            conn = connect_async(self.url.as_str()) => conn?,
        };
        info!(market = %self.sink.market(), url = %self.url, "[PUSH] connected");

        let (mut write, mut read) = ws_stream.split();
        write
            .send(Message::Text(announcement(&self.app_id, &self.event)))
            .await?;

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => {
                    let _ = write.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match parse_frame(text) {
            Ok(None) => trace!(market = %self.sink.market(), "[PUSH] non-message frame"),
            Ok(Some(pushed)) if pushed.event != self.event => {
                debug!(event = %pushed.event, "[PUSH] ignoring unsubscribed event");
            }
            Ok(Some(pushed)) => {
                debug!(market = %pushed.market, "[PUSH] depth coming");
                if let Err(e) = self.sink.ingest(&pushed.depth, pushed.timestamp_secs()) {
                    warn!(market = %self.sink.market(), error = %e, "[PUSH] discarding depth");
                }
            }
            Err(e) => warn!(market = %self.sink.market(), error = %e, "[PUSH] discarding frame"),
        }
    }
}
