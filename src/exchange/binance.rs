use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::Exchange;
use crate::errors::{AppError, Result};
use crate::models::{Kline, RawDepth, RawLevel};

const BINANCE_REST_ENDPOINT: &str = "https://api.binance.com";
const DEFAULT_DEPTH_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
struct DepthMsg {
    #[serde(rename = "lastUpdateId")]
    _last_update_id: u64,
    bids: Vec<RawLevel>,
    asks: Vec<RawLevel>,
}

/// Public Binance spot market data for one pair, e.g. "eth_usdt".
#[derive(Debug, Clone)]
pub struct BinanceMarket {
    symbol: String,
    base_url: String,
    depth_limit: usize,
    client: reqwest::Client,
}

impl BinanceMarket {
    pub fn new(pair_code: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            symbol: symbol_for(pair_code),
            base_url: BINANCE_REST_ENDPOINT.to_string(),
            depth_limit: DEFAULT_DEPTH_LIMIT,
            client,
        })
    }

    /// Point the client at another REST root (testnet, proxy).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_depth_limit(mut self, limit: usize) -> Self {
        self.depth_limit = limit;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))?;
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        Ok(url)
    }
}

#[async_trait]
impl Exchange for BinanceMarket {
    async fn update_depth(&self) -> Result<RawDepth> {
        let url = self.endpoint(
            "/api/v3/depth",
            &[
                ("symbol", self.symbol.clone()),
                ("limit", self.depth_limit.to_string()),
            ],
        )?;
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let parsed: DepthMsg = serde_json::from_str(&body)?;
        debug!(
            symbol = %self.symbol,
            bids = parsed.bids.len(),
            asks = parsed.asks.len(),
            "[CEX] depth fetched"
        );
        Ok(RawDepth {
            bids: parsed.bids,
            asks: parsed.asks,
        })
    }

    async fn get_kline(
        &self,
        interval: &str,
        size: Option<usize>,
        since: Option<u64>,
    ) -> Result<Vec<Kline>> {
        let mut query = vec![
            ("symbol", self.symbol.clone()),
            ("interval", interval.to_string()),
        ];
        if let Some(size) = size {
            query.push(("limit", size.to_string()));
        }
        if let Some(since) = since {
            query.push(("startTime", since.to_string()));
        }
        let url = self.endpoint("/api/v3/klines", &query)?;
        let rows: Vec<Vec<Value>> = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        rows.iter().map(|row| parse_kline_row(row)).collect()
    }
}

/// "eth_usdt" -> "ETHUSDT"
fn symbol_for(pair_code: &str) -> String {
    pair_code.replace('_', "").to_uppercase()
}

/// Binance kline rows are `[openTime, "open", "high", "low", "close", "volume", ...]`.
fn parse_kline_row(row: &[Value]) -> Result<Kline> {
    if row.len() < 6 {
        return Err(AppError::Fetch(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }
    let open_time = row[0]
        .as_u64()
        .ok_or_else(|| AppError::Fetch("kline open time is not an integer".into()))?;
    let field = |idx: usize| -> Result<BigDecimal> {
        match &row[idx] {
            Value::String(s) => Ok(BigDecimal::from_str(s)?),
            Value::Number(n) => Ok(BigDecimal::from_str(&n.to_string())?),
            other => Err(AppError::Fetch(format!("unexpected kline field {other}"))),
        }
    };
    Ok(Kline {
        open_time,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;

    #[test]
    fn parse_depth_message_shape() {
        let raw = r#"{"lastUpdateId":1,"bids":[["100.0","1.0"]],"asks":[["101.0","2.0"]]}"#;
        let parsed: Result<DepthMsg> = serde_json::from_str::<DepthMsg>(raw).map_err(Into::into);
        assert!(parsed.is_ok());
    }

    #[test]
    fn depth_message_normalizes_exactly() {
        let raw = r#"{
            "lastUpdateId": 123,
            "bids": [["100.5", "2.25"], ["101.10", "1"]],
            "asks": [["102.0", "3.50"], ["101.5", "0.1"]]
        }"#;
        let parsed: DepthMsg = serde_json::from_str(raw).expect("json should parse");
        let depth = normalize(&parsed.bids, &parsed.asks).unwrap();
        assert_eq!(depth.bids[0].price, BigDecimal::from_str("101.1").unwrap());
        assert_eq!(depth.asks[0].price, BigDecimal::from_str("101.5").unwrap());
        assert_eq!(depth.asks[0].amount, BigDecimal::from_str("0.1").unwrap());
    }

    #[test]
    fn symbol_and_endpoint() {
        let market = BinanceMarket::new("eth_usdt", Duration::from_secs(10))
            .unwrap()
            .with_base_url("http://localhost:9000/")
            .with_depth_limit(5);
        assert_eq!(market.symbol(), "ETHUSDT");
        let url = market
            .endpoint(
                "/api/v3/depth",
                &[("symbol", "ETHUSDT".into()), ("limit", "5".into())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/api/v3/depth?symbol=ETHUSDT&limit=5"
        );
    }

    #[test]
    fn kline_rows_parse_and_reject_short_rows() {
        let rows: Vec<Vec<Value>> = serde_json::from_str(
            r#"[[1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100","148976.11427815",1499644799999]]"#,
        )
        .unwrap();
        let kline = parse_kline_row(&rows[0]).unwrap();
        assert_eq!(kline.open_time, 1_499_040_000_000);
        assert_eq!(kline.high, BigDecimal::from_str("0.8").unwrap());
        assert_eq!(kline.volume, BigDecimal::from_str("148976.11427815").unwrap());

        let short = vec![Value::from(1u64), Value::from("1")];
        assert!(matches!(parse_kline_row(&short), Err(AppError::Fetch(_))));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_fetch_failure() {
        let market = BinanceMarket::new("eth_usdt", Duration::from_millis(500))
            .unwrap()
            .with_base_url("http://127.0.0.1:1");
        let err = market.update_depth().await.unwrap_err();
        assert!(err.is_fetch_failure(), "{err}");
    }
}
