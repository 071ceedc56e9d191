//! Polygon exchange fills from `OrderFilled` logs.
//!
//! Log-based source: each fetch returns the fills appended since the previous
//! fetch for that contract, capped at `max_block_span` blocks per call. The
//! first fetch of a contract starts at the current head; the poller discards
//! whatever that first fetch returns.

use super::{Instrument, MarketSource, RawObservation, Snapshot, SourceError, SourceKind};
use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, warn};

/// OrderFilled(bytes32 indexed orderHash, address indexed maker, address indexed taker,
///             uint256 makerAssetId, uint256 takerAssetId,
///             uint256 makerAmountFilled, uint256 takerAmountFilled, uint256 fee)
const ORDER_FILLED_SIGNATURE: &str =
    "OrderFilled(bytes32,address,address,uint256,uint256,uint256,uint256,uint256)";

/// USDC and conditional tokens both use 6 decimals.
const TOKEN_DECIMALS: u32 = 6;

pub fn order_filled_topic() -> B256 {
    keccak256(ORDER_FILLED_SIGNATURE.as_bytes())
}

pub struct ChainLogSource {
    provider: DynProvider,
    exchanges: Vec<Address>,
    max_block_span: u64,
    topic: B256,
    /// Next block to scan, per exchange contract.
    cursors: Mutex<HashMap<Address, u64>>,
}

impl ChainLogSource {
    pub fn new(rpc_url: &str, exchanges: &[String], max_block_span: u64) -> Result<Self, SourceError> {
        let url = rpc_url
            .parse::<Url>()
            .map_err(|e| SourceError::Rpc(format!("invalid rpc url {rpc_url}: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();

        let mut addresses = Vec::new();
        for raw in exchanges {
            match Address::from_str(raw) {
                Ok(addr) => addresses.push(addr),
                Err(e) => warn!(address = %raw, error = %e, "skipping invalid exchange address"),
            }
        }

        Ok(Self {
            provider,
            exchanges: addresses,
            max_block_span: max_block_span.max(1),
            topic: order_filled_topic(),
            cursors: Mutex::new(HashMap::new()),
        })
    }

    fn cursor(&self, exchange: &Address) -> Option<u64> {
        self.cursors
            .lock()
            .ok()
            .and_then(|c| c.get(exchange).copied())
    }

    fn advance(&self, exchange: Address, next: u64) {
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.insert(exchange, next);
        }
    }
}

#[async_trait]
impl MarketSource for ChainLogSource {
    fn name(&self) -> &str {
        "chain"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Log
    }

    async fn list_instruments(&self) -> Result<Vec<Instrument>, SourceError> {
        Ok(self
            .exchanges
            .iter()
            .map(|addr| {
                let mut instrument =
                    Instrument::new(format!("{addr:#x}"), format!("Polymarket exchange {addr:#x}"));
                instrument.link = Some(format!("https://polygonscan.com/address/{addr:#x}"));
                instrument
            })
            .collect())
    }

    async fn fetch_snapshot(&self, instrument: &Instrument) -> Result<Snapshot, SourceError> {
        let exchange = Address::from_str(&instrument.id)
            .map_err(|e| SourceError::Malformed(format!("exchange address {}: {e}", instrument.id)))?;

        let head = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| SourceError::Rpc(e.to_string()))?;
        let (from, to) = match block_range(self.cursor(&exchange), head, self.max_block_span) {
            Some(range) => range,
            None => return Ok(Snapshot::default()),
        };

        let filter = Filter::new()
            .address(exchange)
            .event_signature(self.topic)
            .from_block(from)
            .to_block(to);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| SourceError::Rpc(e.to_string()))?;
        self.advance(exchange, to.saturating_add(1));

        let orders: Vec<RawObservation> = logs.iter().filter_map(decode_log).collect();
        debug!(
            exchange = %instrument.id,
            from = from,
            to = to,
            logs = logs.len(),
            fills = orders.len(),
            "scanned exchange logs"
        );

        Ok(Snapshot {
            orders,
            volume: None,
            mid_price: None,
        })
    }
}

/// Inclusive block range to scan next, or None when already at head.
fn block_range(cursor: Option<u64>, head: u64, max_span: u64) -> Option<(u64, u64)> {
    let from = cursor.unwrap_or(head);
    if from > head {
        return None;
    }
    Some((from, head.min(from.saturating_add(max_span - 1))))
}

fn decode_log(log: &Log) -> Option<RawObservation> {
    decode_order_filled(log.topics(), &log.data().data)
}

/// Decode one OrderFilled log into a fill observation keyed by token id.
/// A maker asset id of zero means the maker paid USDC (a buy).
pub fn decode_order_filled(topics: &[B256], data: &[u8]) -> Option<RawObservation> {
    if data.len() < 32 * 4 {
        return None;
    }
    let word = |i: usize| U256::from_be_slice(&data[i * 32..(i + 1) * 32]);
    let maker_asset = word(0);
    let taker_asset = word(1);
    let maker_amount = word(2);
    let taker_amount = word(3);

    let (side, token_id, usdc, shares) = if maker_asset.is_zero() {
        ("BUY", taker_asset, maker_amount, taker_amount)
    } else {
        ("SELL", maker_asset, taker_amount, maker_amount)
    };

    let shares = token_amount(shares)?;
    let usdc = token_amount(usdc)?;
    let unit_price = usdc
        .checked_div(shares)
        .and_then(|p| p.checked_mul(Decimal::ONE_HUNDRED))
        .map(|p| p.round_dp(4))
        .unwrap_or(Decimal::ZERO);

    let maker = topics
        .get(2)
        .map(|t| format!("{:#x}", Address::from_slice(&t.0[12..])));

    Some(RawObservation {
        instrument_id: token_id.to_string(),
        side: side.to_string(),
        unit_price,
        quantity: shares,
        observed_at: Utc::now(),
        wallet: maker,
    })
}

fn token_amount(raw: U256) -> Option<Decimal> {
    let value: u128 = raw.try_into().ok()?;
    let value = i128::try_from(value).ok()?;
    Decimal::try_from_i128_with_scale(value, TOKEN_DECIMALS).ok()
}
