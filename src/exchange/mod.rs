//! Exchange capability surface.
//!
//! Responsibilities of an implementation:
//! • Fetch the raw order book for its pair on demand.
//! • Optionally serve candlesticks and place orders.
//!
//! The depth cache only ever talks to this trait, never to a concrete venue.

use async_trait::async_trait;
use bigdecimal::BigDecimal;

use crate::errors::{AppError, Result};
use crate::models::{Kline, RawDepth};

pub mod binance;

pub use binance::BinanceMarket;

#[async_trait]
pub trait Exchange: Send + Sync {
    /// Retrieve the current raw book. Order of levels is irrelevant.
    async fn update_depth(&self) -> Result<RawDepth>;

    /// Candlesticks of the given interval, newest last.
    async fn get_kline(
        &self,
        _interval: &str,
        _size: Option<usize>,
        _since: Option<u64>,
    ) -> Result<Vec<Kline>> {
        Err(AppError::Unsupported("get_kline"))
    }

    /// Place a limit buy; returns the venue order id.
    async fn buy(&self, _price: &BigDecimal, _amount: &BigDecimal) -> Result<String> {
        Err(AppError::Unsupported("buy"))
    }

    /// Place a limit sell; returns the venue order id.
    async fn sell(&self, _price: &BigDecimal, _amount: &BigDecimal) -> Result<String> {
        Err(AppError::Unsupported("sell"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::Zero;

    struct DepthOnly;

    #[async_trait]
    impl Exchange for DepthOnly {
        async fn update_depth(&self) -> Result<RawDepth> {
            Ok(RawDepth::default())
        }
    }

    #[tokio::test]
    async fn optional_capabilities_default_to_unsupported() {
        let ex = DepthOnly;
        let zero = BigDecimal::zero();
        assert!(matches!(
            ex.get_kline("1m", None, None).await,
            Err(AppError::Unsupported("get_kline"))
        ));
        assert!(matches!(ex.buy(&zero, &zero).await, Err(AppError::Unsupported("buy"))));
        assert!(matches!(ex.sell(&zero, &zero).await, Err(AppError::Unsupported("sell"))));
        assert_eq!(ex.update_depth().await.unwrap(), RawDepth::default());
    }
}
