//! Optional wallet-age enrichment.
//!
//! Looks up the first transaction of a wallet through a Polygonscan-compatible
//! `txlist` endpoint. Any failure means "unknown"; enrichment never blocks or
//! fails an alert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait WalletAgeLookup: Send + Sync {
    /// Age in whole days, or None when unknown.
    async fn wallet_age_days(&self, address: &str) -> Option<u32>;
}

pub struct PolygonscanLookup {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TxListResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxEntry {
    #[serde(default)]
    time_stamp: String,
}

impl PolygonscanLookup {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    async fn first_tx_timestamp(&self, address: &str) -> Result<Option<i64>, reqwest::Error> {
        let resp: TxListResponse = self
            .http
            .get(&self.base_url)
            .query(&[
                ("module", "account"),
                ("action", "txlist"),
                ("address", address),
                ("startblock", "0"),
                ("endblock", "99999999"),
                ("page", "1"),
                ("offset", "1"),
                ("sort", "asc"),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?
            .json()
            .await?;
        Ok(first_timestamp(&resp))
    }
}

fn first_timestamp(resp: &TxListResponse) -> Option<i64> {
    if resp.status != "1" {
        return None;
    }
    let entries: Vec<TxEntry> = serde_json::from_value(resp.result.clone()).ok()?;
    entries.first()?.time_stamp.parse().ok()
}

/// Whole days between `first_seen` (unix seconds) and `now`.
pub fn age_in_days(first_seen: i64, now: DateTime<Utc>) -> Option<u32> {
    let first = DateTime::from_timestamp(first_seen, 0)?;
    let days = (now - first).num_days();
    u32::try_from(days.max(0)).ok()
}

#[async_trait]
impl WalletAgeLookup for PolygonscanLookup {
    async fn wallet_age_days(&self, address: &str) -> Option<u32> {
        match self.first_tx_timestamp(address).await {
            Ok(Some(ts)) => age_in_days(ts, Utc::now()),
            Ok(None) => None,
            Err(e) => {
                debug!(wallet = %address, error = %e, "wallet age lookup failed");
                None
            }
        }
    }
}
