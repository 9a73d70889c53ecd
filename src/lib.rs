//! Freshness-bounded order book cache for exchange adapters.
//!
//! A `DepthCache` owns one market's book, refreshes it from an `Exchange`
//! when it goes stale, stops serving it once it expires, and derives the
//! best bid/ask ticker from it. A push transport can feed the same cache
//! in the background.

pub mod cache;
pub mod clock;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod models;
pub mod normalizer;
pub mod push;
pub mod utils;

pub use cache::{CacheState, DepthCache, DepthSink, SharedDepth};
pub use config::{AppConfig, CacheSettings, PushTransport, SocketSettings};
pub use errors::{AppError, Result};
pub use exchange::{BinanceMarket, Exchange};
pub use models::{Depth, MarketIdentity, PricePoint, RawDepth, RawLevel, RawNumber, Ticker};
