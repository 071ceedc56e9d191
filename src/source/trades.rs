//! Polymarket Data API trade feed.
//!
//! Instruments are markets (condition ids). Each snapshot is the most recent
//! page of public trades for the market; trades already seen on an earlier
//! poll are suppressed downstream by the dedup ledger.

use super::gamma::fetch_markets;
use super::{
    decimal_from_value, get_json, to_cents, Instrument, MarketSource, RawObservation, Snapshot,
    SourceError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

const TRADES_PER_FETCH: usize = 100;

pub struct TradeFeedSource {
    http: reqwest::Client,
    gamma_url: String,
    data_api_url: String,
    max_markets: usize,
    page_delay: Duration,
}

impl TradeFeedSource {
    pub fn new(
        http: reqwest::Client,
        gamma_url: String,
        data_api_url: String,
        max_markets: usize,
    ) -> Self {
        Self {
            http,
            gamma_url,
            data_api_url,
            max_markets,
            page_delay: Duration::ZERO,
        }
    }

    /// Delay between Gamma listing pages.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }
}

#[async_trait]
impl MarketSource for TradeFeedSource {
    fn name(&self) -> &str {
        "trades"
    }

    async fn list_instruments(&self) -> Result<Vec<Instrument>, SourceError> {
        let markets = fetch_markets(
            &self.http,
            &self.gamma_url,
            self.max_markets,
            self.page_delay,
        )
        .await?;
        Ok(markets
            .iter()
            .map(|m| Instrument {
                id: m.condition_id.clone(),
                display_name: m.question.clone(),
                link: m.link(),
                volume: None,
            })
            .collect())
    }

    async fn fetch_snapshot(&self, instrument: &Instrument) -> Result<Snapshot, SourceError> {
        let url = format!("{}/trades", self.data_api_url);
        let trades: Vec<WireTrade> = get_json(
            &self.http,
            &url,
            &[
                ("market", instrument.id.clone()),
                ("limit", TRADES_PER_FETCH.to_string()),
            ],
        )
        .await?;

        Ok(Snapshot {
            orders: trades
                .iter()
                .map(|t| t.to_observation(&instrument.id))
                .collect(),
            volume: None,
            mid_price: None,
        })
    }
}

// --- Wire format types from the Data API ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTrade {
    #[serde(default)]
    pub proxy_wallet: Option<String>,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub size: serde_json::Value,
    #[serde(default)]
    pub price: serde_json::Value,
    /// Unix seconds
    #[serde(default)]
    pub timestamp: i64,
}

impl WireTrade {
    fn to_observation(&self, instrument_id: &str) -> RawObservation {
        let side = if self.outcome.is_empty() {
            self.side.to_uppercase()
        } else {
            format!("{} {}", self.side, self.outcome).to_uppercase()
        };
        RawObservation {
            instrument_id: instrument_id.to_string(),
            side,
            unit_price: to_cents(decimal_from_value(&self.price)),
            quantity: decimal_from_value(&self.size),
            observed_at: DateTime::from_timestamp(self.timestamp, 0).unwrap_or_else(Utc::now),
            wallet: self.proxy_wallet.clone().filter(|w| !w.is_empty()),
        }
    }
}
