//! Shared data structures used throughout the application.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

/// One price level of an order book, in exact decimal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PricePoint {
    pub price: BigDecimal,
    pub amount: BigDecimal,
}

impl PricePoint {
    pub fn new(price: BigDecimal, amount: BigDecimal) -> Self {
        Self { price, amount }
    }

    pub fn zero() -> Self {
        Self {
            price: BigDecimal::zero(),
            amount: BigDecimal::zero(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.price.is_zero() && self.amount.is_zero()
    }
}

impl fmt::Display for PricePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.amount, self.price)
    }
}

/// Normalized order book: asks ascending, bids descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Depth {
    pub asks: Vec<PricePoint>,
    pub bids: Vec<PricePoint>,
}

impl Depth {
    /// Book of an adapter that has never been refreshed: one zero row per side.
    pub fn placeholder() -> Self {
        Self {
            asks: vec![PricePoint::zero()],
            bids: vec![PricePoint::zero()],
        }
    }
}

impl Default for Depth {
    fn default() -> Self {
        Self::placeholder()
    }
}

/// Best ask and best bid, always derived from a `Depth`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticker {
    pub ask: PricePoint,
    pub bid: PricePoint,
}

impl Ticker {
    /// Top of book; an empty side yields the zero `PricePoint`.
    pub fn from_depth(depth: &Depth) -> Self {
        Self {
            ask: depth.asks.first().cloned().unwrap_or_else(PricePoint::zero),
            bid: depth.bids.first().cloned().unwrap_or_else(PricePoint::zero),
        }
    }
}

/// A number as delivered by an exchange: either a JSON number or
/// numeric text such as `"1234.50"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Number(serde_json::Number),
    Text(String),
}

impl RawNumber {
    /// Exact decimal value. Floats go through their shortest textual form
    /// so `0.1` becomes `0.1`, not its binary expansion.
    pub fn to_decimal(&self) -> Result<BigDecimal> {
        match self {
            RawNumber::Number(n) => Ok(BigDecimal::from_str(&n.to_string())?),
            RawNumber::Text(s) => Ok(BigDecimal::from_str(s.trim())?),
        }
    }
}

impl From<&str> for RawNumber {
    fn from(s: &str) -> Self {
        RawNumber::Text(s.to_string())
    }
}

impl From<String> for RawNumber {
    fn from(s: String) -> Self {
        RawNumber::Text(s)
    }
}

impl From<i64> for RawNumber {
    fn from(v: i64) -> Self {
        RawNumber::Number(v.into())
    }
}

impl From<f64> for RawNumber {
    fn from(v: f64) -> Self {
        match serde_json::Number::from_f64(v) {
            Some(n) => RawNumber::Number(n),
            None => RawNumber::Text(v.to_string()),
        }
    }
}

/// Un-normalized `(price, amount)` pair, serialized as a two element array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLevel(pub RawNumber, pub RawNumber);

impl RawLevel {
    pub fn new(price: impl Into<RawNumber>, amount: impl Into<RawNumber>) -> Self {
        Self(price.into(), amount.into())
    }
}

/// Raw book as returned by a fetch or carried on the bus, in arbitrary order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawDepth {
    pub bids: Vec<RawLevel>,
    pub asks: Vec<RawLevel>,
}

/// One candlestick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kline {
    /// Open time in milliseconds since the epoch.
    pub open_time: u64,
    pub open: BigDecimal,
    pub high: BigDecimal,
    pub low: BigDecimal,
    pub close: BigDecimal,
    pub volume: BigDecimal,
}

/// Who a depth cache is quoting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketIdentity {
    /// Human readable name used in logs, e.g. `Binance`.
    pub name: String,
    /// Lower-case code as `<market>_<base>`, e.g. `eth_usdt`.
    pub pair_code: String,
    pub market_currency: String,
    pub base_currency: String,
    pub fee_rate: BigDecimal,
    /// Event announced to the socket push transport.
    pub depth_event: String,
}

impl MarketIdentity {
    pub fn new(name: &str, pair_code: &str, fee_rate: BigDecimal) -> Result<Self> {
        let (market, base) = pair_code
            .split_once('_')
            .filter(|(m, b)| !m.is_empty() && !b.is_empty() && !b.contains('_'))
            .ok_or_else(|| {
                AppError::Config(format!(
                    "pair code {pair_code:?} must look like <market>_<base>"
                ))
            })?;
        Ok(Self {
            name: name.to_string(),
            pair_code: pair_code.to_string(),
            market_currency: market.to_uppercase(),
            base_currency: base.to_uppercase(),
            fee_rate,
            depth_event: format!("depth_{pair_code}"),
        })
    }

    pub fn with_depth_event(mut self, event: impl Into<String>) -> Self {
        self.depth_event = event.into();
        self
    }
}
