//! Configuration loader and application settings.

use std::str::FromStr;
use std::time::Duration;

use bigdecimal::BigDecimal;

use crate::errors::{AppError, Result};

const DEFAULT_PAIR_CODE: &str = "eth_usdt";
const DEFAULT_FEE_RATE: &str = "0.001";
const DEFAULT_UPDATE_RATE_SECS: f64 = 3.0;
const DEFAULT_EXPIRATION_SECS: f64 = 120.0;
const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 10.0;
const DEFAULT_SOCKET_PATH: &str = "/socket.io/?EIO=3&transport=websocket";
const DEFAULT_SOCKET_APP_ID: &str = "haobtcnotify";

/// Timing bounds of a single depth cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    /// Age after which a read attempts a refresh.
    pub update_rate: Duration,
    /// Age after which cached depth is no longer served.
    pub market_expiration_time: Duration,
    /// Upper bound on a single fetch.
    pub request_timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            update_rate: Duration::from_secs_f64(DEFAULT_UPDATE_RATE_SECS),
            market_expiration_time: Duration::from_secs_f64(DEFAULT_EXPIRATION_SECS),
            request_timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Socket push endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Application identifier sent in the subscription announcement.
    pub app_id: String,
}

impl SocketSettings {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            path: DEFAULT_SOCKET_PATH.to_string(),
            app_id: DEFAULT_SOCKET_APP_ID.to_string(),
        }
    }

    /// Websocket endpoint. A scheme on `host` picks plain or TLS:
    /// `http`/`ws` map to `ws`, `https`/`wss` to `wss`.
    pub fn url(&self) -> Result<url::Url> {
        let (scheme, host) = match self.host.split_once("://") {
            None => ("ws", self.host.as_str()),
            Some(("http" | "ws", host)) => ("ws", host),
            Some(("https" | "wss", host)) => ("wss", host),
            Some((other, _)) => {
                return Err(AppError::Config(format!(
                    "SOCKET_HOST scheme {other:?} is not http, https, ws or wss"
                )));
            }
        };
        let host = host.trim_end_matches('/');
        if host.is_empty() {
            return Err(AppError::Config("SOCKET_HOST has no host name".into()));
        }
        Ok(url::Url::parse(&format!(
            "{}://{}:{}{}",
            scheme, host, self.port, self.path
        ))?)
    }
}

/// Which push transport, if any, feeds depth asynchronously.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PushTransport {
    #[default]
    None,
    Bus { port: u16 },
    Socket(SocketSettings),
}

/// Consolidated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Pair code as `<market>_<base>`, e.g. "eth_usdt".
    pub pair_code: String,
    pub fee_rate: BigDecimal,
    pub cache: CacheSettings,
    pub push: PushTransport,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pair_code = lookup("PAIR_CODE").unwrap_or_else(|| DEFAULT_PAIR_CODE.into());
        let fee_rate = lookup("FEE_RATE").unwrap_or_else(|| DEFAULT_FEE_RATE.into());
        let fee_rate = BigDecimal::from_str(fee_rate.trim())
            .map_err(|e| AppError::Config(format!("FEE_RATE: {e}")))?;

        let cache = CacheSettings {
            update_rate: seconds(&lookup, "MARKET_UPDATE_RATE", DEFAULT_UPDATE_RATE_SECS)?,
            market_expiration_time: seconds(
                &lookup,
                "MARKET_EXPIRATION_TIME",
                DEFAULT_EXPIRATION_SECS,
            )?,
            request_timeout: seconds(&lookup, "REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT_SECS)?,
        };

        let transport = lookup("PUSH_TRANSPORT").unwrap_or_else(|| "none".into());
        let push = match transport.trim().to_lowercase().as_str() {
            "" | "none" => PushTransport::None,
            "bus" => PushTransport::Bus {
                port: port(&lookup, "BUS_PORT")?,
            },
            "socket" => {
                let host = lookup("SOCKET_HOST")
                    .ok_or_else(|| AppError::Config("SOCKET_HOST is required".into()))?;
                let mut socket = SocketSettings::new(&host, port(&lookup, "SOCKET_PORT")?);
                if let Some(path) = lookup("SOCKET_PATH") {
                    socket.path = path;
                }
                if let Some(app_id) = lookup("SOCKET_APP_ID") {
                    socket.app_id = app_id;
                }
                socket.url()?;
                PushTransport::Socket(socket)
            }
            other => {
                return Err(AppError::Config(format!(
                    "PUSH_TRANSPORT must be none, bus or socket, got {other:?}"
                )));
            }
        };

        Ok(Self {
            pair_code,
            fee_rate,
            cache,
            push,
        })
    }
}

fn seconds<F>(lookup: &F, key: &str, default: f64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = match lookup(key) {
        Some(raw) => raw.trim().parse::<f64>()?,
        None => default,
    };
    Duration::try_from_secs_f64(secs)
        .map_err(|_| AppError::Config(format!("{key} must be a non-negative number of seconds")))
}

fn port<F>(lookup: &F, key: &str) -> Result<u16>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).ok_or_else(|| AppError::Config(format!("{key} is required")))?;
    Ok(raw.trim().parse::<u16>()?)
}
