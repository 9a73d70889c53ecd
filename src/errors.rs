use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse float error: {0}")]
    ParseFloat(#[from] std::num::ParseFloatError),

    #[error("Parse int error: {0}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Decimal parse error: {0}")]
    Decimal(#[from] bigdecimal::ParseBigDecimalError),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Market {0} is terminated")]
    Terminated(String),

    #[error("Operation not supported by this market: {0}")]
    Unsupported(&'static str),
}

impl AppError {
    /// Whether the error belongs to the family of failures a pull refresh
    /// can run into (network, timeout, payload parsing).
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            AppError::Fetch(_)
                | AppError::Timeout(_)
                | AppError::Http(_)
                | AppError::Decimal(_)
                | AppError::SerdeJson(_)
                | AppError::Io(_)
        )
    }
}
