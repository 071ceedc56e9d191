//! Gamma API market listing shared by the CLOB and trade-feed adapters.

use super::{decimal_from_value, get_json, SourceError};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::debug;

const PAGE_LIMIT: usize = 100;

// ─── Gamma API response type ────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    /// JSON-encoded string like "[\"Yes\",\"No\"]"
    #[serde(default)]
    pub outcomes: Option<String>,
    /// JSON-encoded string
    #[serde(default)]
    pub clob_token_ids: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    /// Number or numeric string depending on endpoint version.
    #[serde(default)]
    pub volume: serde_json::Value,
    #[serde(default)]
    pub accepting_orders: Option<bool>,
}

/// A listed market with its outcome tokens decoded.
#[derive(Debug, Clone)]
pub struct ListedMarket {
    pub condition_id: String,
    pub question: String,
    pub slug: Option<String>,
    pub outcomes: Vec<String>,
    pub clob_token_ids: Vec<String>,
    pub volume: Decimal,
}

impl ListedMarket {
    /// Returns None if the market is missing required fields.
    pub fn from_gamma(raw: &GammaMarket) -> Option<Self> {
        let condition_id = match &raw.condition_id {
            Some(c) if !c.is_empty() => c.clone(),
            _ => return None,
        };
        let clob_token_ids: Vec<String> = raw
            .clob_token_ids
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        if clob_token_ids.is_empty() {
            return None;
        }
        let outcomes: Vec<String> = raw
            .outcomes
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();

        Some(Self {
            condition_id,
            question: raw.question.clone().unwrap_or_else(|| "???".to_string()),
            slug: raw.slug.clone().filter(|s| !s.is_empty()),
            outcomes,
            clob_token_ids,
            volume: decimal_from_value(&raw.volume),
        })
    }

    pub fn link(&self) -> Option<String> {
        self.slug
            .as_ref()
            .map(|slug| format!("https://polymarket.com/market/{slug}"))
    }

    pub fn outcome_label(&self, index: usize) -> String {
        self.outcomes
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("Outcome {index}"))
    }
}

/// Active, open markets ordered by volume, at most `max_markets`. Pages after
/// the first wait `page_delay`.
pub async fn fetch_markets(
    http: &reqwest::Client,
    gamma_url: &str,
    max_markets: usize,
    page_delay: Duration,
) -> Result<Vec<ListedMarket>, SourceError> {
    let url = format!("{gamma_url}/markets");
    let mut markets = Vec::new();
    let mut offset = 0usize;

    while markets.len() < max_markets {
        if offset > 0 && !page_delay.is_zero() {
            tokio::time::sleep(page_delay).await;
        }
        let limit = PAGE_LIMIT.min(max_markets - markets.len());
        let page: Vec<GammaMarket> = get_json(
            http,
            &url,
            &[
                ("active", "true".to_string()),
                ("closed", "false".to_string()),
                ("order", "volumeNum".to_string()),
                ("ascending", "false".to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await?;

        let count = page.len();
        debug!(offset = offset, count = count, "fetched gamma markets page");
        markets.extend(
            page.iter()
                .filter(|m| m.accepting_orders != Some(false))
                .filter_map(ListedMarket::from_gamma),
        );
        if count < limit {
            break;
        }
        offset += count;
    }

    markets.truncate(max_markets);
    Ok(markets)
}
