use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::shutdown_requested;
use crate::errors::{AppError, Result};
use crate::models::RawDepth;
use crate::normalizer::normalize;

const RELAY_CAPACITY: usize = 256;
/// Longest accepted frame, newline excluded. Longer lines drop the peer.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// TCP relay for raw depth frames.
///
/// Peers exchange newline-delimited JSON `{"bids": [...], "asks": [...]}`.
/// Every valid frame received from any peer is re-broadcast to all peers and
/// to in-process subscribers. Malformed frames are dropped.
pub struct BusRelay {
    listener: TcpListener,
    market: String,
    tx: broadcast::Sender<RawDepth>,
    shutdown: watch::Receiver<bool>,
}

impl BusRelay {
    pub async fn bind(port: u16, market: &str, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let (tx, _) = broadcast::channel(RELAY_CAPACITY);
        Ok(Self {
            listener,
            market: market.to_string(),
            tx,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn sender(&self) -> broadcast::Sender<RawDepth> {
        self.tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RawDepth> {
        self.tx.subscribe()
    }

    pub async fn run(mut self) {
        info!(market = %self.market, addr = ?self.listener.local_addr().ok(), "[BUS] relay listening");
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut self.shutdown) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(market = %self.market, %peer, "[BUS] peer connected");
                        tokio::spawn(serve_peer(
                            stream,
                            peer,
                            self.market.clone(),
                            self.tx.clone(),
                            self.shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!(market = %self.market, error = %e, "[BUS] accept failed"),
                },
            }
        }
        info!(market = %self.market, "[BUS] relay stopped");
    }
}

/// Outcome of reading one newline-terminated frame.
#[derive(Debug, PartialEq)]
enum Inbound {
    Frame(String),
    Oversized,
    Closed,
}

/// Read the next frame into `buf`, never buffering more than
/// `MAX_FRAME_BYTES + 1` bytes. Cancel safe: a partial line stays in `buf`
/// and the next call continues it.
async fn next_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Inbound>
where
    R: AsyncBufRead + Unpin,
{
    let limit = (MAX_FRAME_BYTES + 1).saturating_sub(buf.len()) as u64;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;

    if buf.last() == Some(&b'\n') {
        let line = String::from_utf8_lossy(&buf[..buf.len() - 1])
            .trim_end_matches('\r')
            .to_string();
        buf.clear();
        return Ok(Inbound::Frame(line));
    }
    if buf.len() > MAX_FRAME_BYTES {
        buf.clear();
        return Ok(Inbound::Oversized);
    }
    if read == 0 {
        return Ok(Inbound::Closed);
    }
    // unterminated tail before EOF
    buf.clear();
    Ok(Inbound::Closed)
}

/// Validate one inbound line as a raw depth frame.
pub fn parse_bus_frame(line: &str) -> Result<RawDepth> {
    let raw: RawDepth = serde_json::from_str(line)
        .map_err(|e| AppError::Ingestion(format!("bad bus frame: {e}")))?;
    normalize(&raw.bids, &raw.asks)
        .map_err(|e| AppError::Ingestion(format!("bad bus frame: {e}")))?;
    Ok(raw)
}

async fn serve_peer(
    stream: TcpStream,
    peer: SocketAddr,
    market: String,
    tx: broadcast::Sender<RawDepth>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut relayed = tx.subscribe();

    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            inbound = next_frame(&mut reader, &mut buf) => match inbound {
                Ok(Inbound::Frame(line)) if line.trim().is_empty() => {}
                Ok(Inbound::Frame(line)) => match parse_bus_frame(&line) {
                    Ok(raw) => {
                        let _ = tx.send(raw);
                    }
                    Err(e) => warn!(%market, %peer, error = %e, "[BUS] discarding frame"),
                },
                Ok(Inbound::Oversized) => {
                    warn!(%market, %peer, limit = MAX_FRAME_BYTES, "[BUS] frame too long, dropping peer");
                    break;
                }
                Ok(Inbound::Closed) => break,
                Err(e) => {
                    warn!(%market, %peer, error = %e, "[BUS] read failed");
                    break;
                }
            },
            frame = relayed.recv() => match frame {
                Ok(raw) => {
                    let mut text = match serde_json::to_string(&raw) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(%market, error = %e, "[BUS] frame encoding failed");
                            continue;
                        }
                    };
                    text.push('\n');
                    if let Err(e) = writer.write_all(text.as_bytes()).await {
                        debug!(%market, %peer, error = %e, "[BUS] peer went away");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%market, %peer, skipped, "[BUS] peer lagging, frames dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!(%market, %peer, "[BUS] peer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawLevel;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn bus_frames_are_validated() {
        let raw = parse_bus_frame(r#"{"bids":[["10","1"]],"asks":[[11, 2]]}"#).unwrap();
        assert_eq!(raw.bids, vec![RawLevel::new("10", "1")]);
        assert!(matches!(parse_bus_frame("not json"), Err(AppError::Ingestion(_))));
        assert!(matches!(
            parse_bus_frame(r#"{"bids":[["ten","1"]],"asks":[]}"#),
            Err(AppError::Ingestion(_))
        ));
    }

    #[tokio::test]
    async fn frames_are_split_and_capped() {
        let mut input = b"{\"bids\":[],\"asks\":[]}\r\n\n".to_vec();
        input.extend(std::iter::repeat_n(b'x', MAX_FRAME_BYTES + 10));
        input.extend(b"\nlate\n");
        let mut reader: &[u8] = &input;
        let mut buf = Vec::new();

        assert_eq!(
            next_frame(&mut reader, &mut buf).await.unwrap(),
            Inbound::Frame(r#"{"bids":[],"asks":[]}"#.into())
        );
        assert_eq!(
            next_frame(&mut reader, &mut buf).await.unwrap(),
            Inbound::Frame(String::new())
        );
        assert_eq!(next_frame(&mut reader, &mut buf).await.unwrap(), Inbound::Oversized);
        assert!(buf.is_empty());

        let mut tail: &[u8] = b"exact\nno newline";
        assert_eq!(
            next_frame(&mut tail, &mut buf).await.unwrap(),
            Inbound::Frame("exact".into())
        );
        assert_eq!(next_frame(&mut tail, &mut buf).await.unwrap(), Inbound::Closed);
        assert_eq!(next_frame(&mut tail, &mut buf).await.unwrap(), Inbound::Closed);
    }

    #[tokio::test]
    async fn peer_sending_endless_line_is_dropped() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let relay = BusRelay::bind(0, "Test", stop_rx).await.unwrap();
        let port = relay.local_addr().unwrap().port();
        let task = tokio::spawn(relay.run());

        let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        // the relay may reset the connection before the write finishes
        let _ = peer.write_all(&vec![b'x'; MAX_FRAME_BYTES + 1024]).await;
        let mut scratch = [0u8; 64];
        let read = timeout(Duration::from_secs(5), peer.read(&mut scratch))
            .await
            .expect("peer was not dropped");
        assert!(matches!(read, Ok(0) | Err(_)));

        stop_tx.send_replace(true);
        timeout(Duration::from_secs(5), task)
            .await
            .expect("relay did not stop")
            .unwrap();
    }

    async fn wait_for_receivers(tx: &broadcast::Sender<RawDepth>, count: usize) {
        timeout(Duration::from_secs(5), async {
            while tx.receiver_count() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("peers never subscribed");
    }

    #[tokio::test]
    async fn relays_valid_frames_to_peers_and_subscribers() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let relay = BusRelay::bind(0, "Test", stop_rx).await.unwrap();
        let port = relay.local_addr().unwrap().port();
        let sender = relay.sender();
        let mut internal = relay.subscribe();
        let task = tokio::spawn(relay.run());

        let mut publisher = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let listener_peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        // internal subscriber + one per peer
        wait_for_receivers(&sender, 3).await;

        publisher.write_all(b"garbage\n").await.unwrap();
        publisher
            .write_all(b"{\"bids\":[[\"10\",\"1\"]],\"asks\":[[\"11\",\"2\"]]}\n")
            .await
            .unwrap();

        let got = timeout(Duration::from_secs(5), internal.recv())
            .await
            .expect("relay timed out")
            .unwrap();
        assert_eq!(got.asks, vec![RawLevel::new("11", "2")]);

        let mut lines = BufReader::new(listener_peer).lines();
        let line = timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("peer read timed out")
            .unwrap()
            .expect("peer stream ended");
        assert_eq!(serde_json::from_str::<RawDepth>(&line).unwrap(), got);

        stop_tx.send_replace(true);
        timeout(Duration::from_secs(5), task)
            .await
            .expect("relay did not stop")
            .unwrap();
    }
}
