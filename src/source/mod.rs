//! Upstream market-data adapters.
//!
//! Every adapter reduces its upstream payloads to the same shape: a list of
//! [`Instrument`]s per cycle and a [`Snapshot`] of raw observations per
//! instrument. The poller only ever talks to the [`MarketSource`] trait.
//!
//! - `clob`: Polymarket CLOB order books (resting orders)
//! - `trades`: Polymarket Data API trade feed (fills)
//! - `chain`: Polygon exchange `OrderFilled` logs (fills, log-based)

pub mod chain;
pub mod clob;
pub mod gamma;
pub mod trades;

pub use chain::ChainLogSource;
pub use clob::ClobBookSource;
pub use trades::TradeFeedSource;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Transient failures are retried at the next cycle; the rest point at a
    /// broken endpoint or payload and will likely fail again.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Http(e) => !e.is_decode(),
            SourceError::Status(code) => *code == 429 || *code >= 500,
            SourceError::Timeout(_) => true,
            SourceError::Rpc(_) => true,
            SourceError::Malformed(_) => false,
        }
    }
}

/// How an adapter's snapshots relate to time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Each fetch returns current state (books, recent trades).
    Snapshot,
    /// Each fetch returns entries appended since the previous fetch. The first
    /// fetch only establishes the starting position.
    Log,
}

/// A market/outcome an adapter can be polled for.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub id: String,
    pub display_name: String,
    /// Human-facing market page.
    pub link: Option<String>,
    /// Cumulative traded volume reported by the listing, in USD.
    pub volume: Option<Decimal>,
}

impl Instrument {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            link: None,
            volume: None,
        }
    }
}

/// One order or fill as seen upstream. Prices are in cents.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub instrument_id: String,
    pub side: String,
    pub unit_price: Decimal,
    pub quantity: Decimal,
    pub observed_at: DateTime<Utc>,
    /// Counterparty wallet, when the upstream exposes one.
    pub wallet: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub orders: Vec<RawObservation>,
    /// Cumulative traded volume, if the fetch reports it.
    pub volume: Option<Decimal>,
    /// Book midpoint in cents.
    pub mid_price: Option<Decimal>,
}

#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Short name used in logs and on events.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind {
        SourceKind::Snapshot
    }

    async fn list_instruments(&self) -> Result<Vec<Instrument>, SourceError>;

    async fn fetch_snapshot(&self, instrument: &Instrument) -> Result<Snapshot, SourceError>;
}

/// Dollars → cents. Out-of-range input is zero.
pub fn to_cents(dollars: Decimal) -> Decimal {
    dollars
        .checked_mul(Decimal::ONE_HUNDRED)
        .unwrap_or(Decimal::ZERO)
}

/// Lenient decimal parse: anything unparseable is zero.
pub fn parse_decimal(raw: &str) -> Decimal {
    Decimal::from_str(raw.trim())
        .or_else(|_| Decimal::from_scientific(raw.trim()))
        .unwrap_or(Decimal::ZERO)
}

/// Decimal from a JSON value that may be a number or a numeric string.
pub fn decimal_from_value(value: &serde_json::Value) -> Decimal {
    match value {
        serde_json::Value::String(s) => parse_decimal(s),
        serde_json::Value::Number(n) => parse_decimal(&n.to_string()),
        _ => Decimal::ZERO,
    }
}

/// GET `url` and decode the JSON body. Non-2xx statuses are errors.
pub(crate) async fn get_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<T, SourceError> {
    let resp = http.get(url).query(query).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }
    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| SourceError::Malformed(format!("{url}: {e}")))
}

/// Shared reqwest client with a bounded per-request timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}
