//! Converts raw exchange levels into a canonical `Depth`.
//!
//! Pure transformation: typed to exact decimal, bids sorted descending and
//! asks ascending. Sorting is stable, so levels with equal prices keep
//! their input order.

use crate::errors::Result;
use crate::models::{Depth, PricePoint, RawLevel};

/// Build a `Depth` from unordered raw bids and asks.
///
/// Fails if any price or amount is not a valid decimal; no partial
/// result is produced.
pub fn normalize(raw_bids: &[RawLevel], raw_asks: &[RawLevel]) -> Result<Depth> {
    let mut bids = to_price_points(raw_bids)?;
    let mut asks = to_price_points(raw_asks)?;
    bids.sort_by(|a, b| b.price.cmp(&a.price));
    asks.sort_by(|a, b| a.price.cmp(&b.price));
    Ok(Depth { asks, bids })
}

fn to_price_points(levels: &[RawLevel]) -> Result<Vec<PricePoint>> {
    levels
        .iter()
        .map(|RawLevel(price, amount)| -> Result<PricePoint> {
            Ok(PricePoint::new(price.to_decimal()?, amount.to_decimal()?))
        })
        .collect()
}
