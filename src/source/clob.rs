//! Polymarket CLOB order books.
//!
//! Instruments are outcome tokens of the highest-volume Gamma markets. Each
//! snapshot is the full REST book for one token; every resting level is an
//! observation, so a whale order sitting on the book is seen once per poll
//! until it is filled or pulled.

use super::gamma::{fetch_markets, ListedMarket};
use super::{
    get_json, parse_decimal, to_cents, Instrument, MarketSource, RawObservation, Snapshot,
    SourceError,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub struct ClobBookSource {
    http: reqwest::Client,
    gamma_url: String,
    clob_url: String,
    max_markets: usize,
    page_delay: Duration,
}

impl ClobBookSource {
    pub fn new(http: reqwest::Client, gamma_url: String, clob_url: String, max_markets: usize) -> Self {
        Self {
            http,
            gamma_url,
            clob_url,
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
impl MarketSource for ClobBookSource {
    fn name(&self) -> &str {
        "clob"
    }

    async fn list_instruments(&self) -> Result<Vec<Instrument>, SourceError> {
        let markets = fetch_markets(
            &self.http,
            &self.gamma_url,
            self.max_markets,
            self.page_delay,
        )
        .await?;
        let instruments: Vec<Instrument> = markets.iter().flat_map(token_instruments).collect();
        debug!(
            markets = markets.len(),
            tokens = instruments.len(),
            "listed clob instruments"
        );
        Ok(instruments)
    }

    async fn fetch_snapshot(&self, instrument: &Instrument) -> Result<Snapshot, SourceError> {
        let url = format!("{}/book", self.clob_url);
        let book: WireBook =
            get_json(&self.http, &url, &[("token_id", instrument.id.clone())]).await?;
        Ok(book.into_snapshot(&instrument.id))
    }
}

/// One instrument per outcome token. Gamma reports volume per market, so it
/// is attached to the first outcome only; otherwise a single burst would be
/// counted once per outcome.
fn token_instruments(market: &ListedMarket) -> Vec<Instrument> {
    market
        .clob_token_ids
        .iter()
        .enumerate()
        .map(|(i, token_id)| Instrument {
            id: token_id.clone(),
            display_name: format!("{} [{}]", market.question, market.outcome_label(i)),
            link: market.link(),
            volume: (i == 0).then_some(market.volume),
        })
        .collect()
}

// --- Wire format types from the CLOB REST API ---

#[derive(Debug, Deserialize)]
pub struct WireBook {
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub bids: Vec<WireLevel>,
    #[serde(default)]
    pub asks: Vec<WireLevel>,
}

#[derive(Debug, Deserialize)]
pub struct WireLevel {
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub size: String,
}

impl WireBook {
    fn into_snapshot(self, instrument_id: &str) -> Snapshot {
        let now = Utc::now();
        let level = |side: &str, wire: &WireLevel| RawObservation {
            instrument_id: instrument_id.to_string(),
            side: side.to_string(),
            unit_price: to_cents(parse_decimal(&wire.price)),
            quantity: parse_decimal(&wire.size),
            observed_at: now,
            wallet: None,
        };

        let bids: Vec<RawObservation> = self.bids.iter().map(|l| level("BID", l)).collect();
        let asks: Vec<RawObservation> = self.asks.iter().map(|l| level("ASK", l)).collect();

        let best_bid = bids
            .iter()
            .map(|o| o.unit_price)
            .filter(|p| *p > Decimal::ZERO)
            .max();
        let best_ask = asks
            .iter()
            .map(|o| o.unit_price)
            .filter(|p| *p > Decimal::ZERO)
            .min();
        let mid_price = match (best_bid, best_ask) {
            (Some(b), Some(a)) => b.checked_add(a).map(|sum| sum / Decimal::TWO),
            _ => None,
        };

        Snapshot {
            orders: bids.into_iter().chain(asks).collect(),
            volume: None,
            mid_price,
        }
    }
}
