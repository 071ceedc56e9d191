//! Event detector for polled market snapshots.
//!
//! Two detection kinds run per instrument per cycle:
//!
//! - **Threshold orders**: any single order or fill whose notional
//!   (`price_cents * quantity / 100`) is at least the configured minimum.
//! - **Volume spikes**: the increase in cumulative traded volume since the
//!   previous poll of the same instrument is at least the spike threshold.
//!
//! The detector only proposes candidates. `commit_novel` runs them through the
//! dedup ledger; only novel ones become events.

use crate::fingerprint::{fingerprint, Fingerprint};
use crate::ledger::DedupLedger;
use crate::source::{Instrument, RawObservation, Snapshot};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub const MINOR_UNITS_PER_MAJOR: Decimal = Decimal::ONE_HUNDRED;

/// Side recorded on volume-spike events.
pub const VOLUME_SIDE: &str = "VOLUME";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionKind {
    ThresholdOrder,
    VolumeSpike,
}

impl std::fmt::Display for DetectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionKind::ThresholdOrder => write!(f, "threshold-order"),
            DetectionKind::VolumeSpike => write!(f, "volume-spike"),
        }
    }
}

/// An accepted observation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedEvent {
    pub instrument_id: String,
    pub display_name: String,
    pub side: String,
    /// Cents
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    /// USD
    #[serde(with = "rust_decimal::serde::float")]
    pub notional_value: Decimal,
    pub detection_kind: DetectionKind,
    pub observed_at: DateTime<Utc>,
    pub fingerprint: Fingerprint,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Volume spikes only: which outcome the book is leaning towards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_age_days: Option<u32>,
}

/// Last cumulative volume seen for an instrument.
#[derive(Debug, Clone, Copy)]
pub struct VolumeBaseline {
    pub volume: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// `price_cents * quantity / 100`. Zero when the product does not fit in a
/// `Decimal`, so an absurd upstream size can never fire or panic.
pub fn notional(unit_price: Decimal, quantity: Decimal) -> Decimal {
    unit_price
        .checked_mul(quantity)
        .and_then(|v| v.checked_div(MINOR_UNITS_PER_MAJOR))
        .unwrap_or(Decimal::ZERO)
}

pub struct EventDetector {
    min_trade_size: Decimal,
    volume_spike_threshold: Decimal,
    baselines: HashMap<String, VolumeBaseline>,
}

impl EventDetector {
    pub fn new(min_trade_size: Decimal, volume_spike_threshold: Decimal) -> Self {
        Self {
            min_trade_size,
            volume_spike_threshold,
            baselines: HashMap::new(),
        }
    }

    pub fn min_trade_size(&self) -> Decimal {
        self.min_trade_size
    }

    /// All candidates for one snapshot: threshold orders first, then a volume
    /// spike if the snapshot (or the listing) reports cumulative volume.
    pub fn detect(
        &mut self,
        source: &str,
        instrument: &Instrument,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Vec<DetectedEvent> {
        let mut candidates: Vec<DetectedEvent> = snapshot
            .orders
            .iter()
            .filter_map(|obs| self.check_order(source, instrument, obs))
            .collect();

        if let Some(volume) = snapshot.volume.or(instrument.volume) {
            if let Some(spike) =
                self.check_volume(source, instrument, volume, snapshot.mid_price, now)
            {
                candidates.push(spike);
            }
        }
        candidates
    }

    /// Threshold-order check for a single observation. Inclusive.
    pub fn check_order(
        &self,
        source: &str,
        instrument: &Instrument,
        obs: &RawObservation,
    ) -> Option<DetectedEvent> {
        let value = notional(obs.unit_price, obs.quantity);
        if value < self.min_trade_size {
            return None;
        }
        Some(DetectedEvent {
            instrument_id: obs.instrument_id.clone(),
            display_name: instrument.display_name.clone(),
            side: obs.side.clone(),
            unit_price: obs.unit_price,
            quantity: obs.quantity,
            notional_value: value,
            detection_kind: DetectionKind::ThresholdOrder,
            observed_at: obs.observed_at,
            fingerprint: fingerprint(&obs.instrument_id, &obs.side, obs.unit_price, obs.quantity),
            source: source.to_string(),
            link: instrument.link.clone(),
            outcome_hint: None,
            wallet: obs.wallet.clone(),
            wallet_age_days: None,
        })
    }

    /// Compare `volume` with the instrument's baseline and always move the
    /// baseline to `volume`. The first reading for an instrument only seeds.
    pub fn check_volume(
        &mut self,
        source: &str,
        instrument: &Instrument,
        volume: Decimal,
        mid_price: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Option<DetectedEvent> {
        let previous = self.baselines.insert(
            instrument.id.clone(),
            VolumeBaseline {
                volume,
                observed_at: now,
            },
        );
        let previous = match previous {
            Some(b) => b.volume,
            None => {
                debug!(instrument = %instrument.id, volume = %volume, "volume baseline seeded");
                return None;
            }
        };

        let delta = match volume.checked_sub(previous) {
            Some(d) => d,
            None => return None,
        };
        if delta < self.volume_spike_threshold {
            return None;
        }

        let unit_price = mid_price.unwrap_or(Decimal::ZERO);
        Some(DetectedEvent {
            instrument_id: instrument.id.clone(),
            display_name: instrument.display_name.clone(),
            side: VOLUME_SIDE.to_string(),
            unit_price,
            quantity: delta,
            notional_value: delta,
            detection_kind: DetectionKind::VolumeSpike,
            observed_at: now,
            // previous/current volume pin the reading, so it can only fire once
            fingerprint: fingerprint(&instrument.id, VOLUME_SIDE, previous, volume),
            source: source.to_string(),
            link: instrument.link.clone(),
            outcome_hint: mid_price.and_then(outcome_hint),
            wallet: None,
            wallet_age_days: None,
        })
    }

    /// Drop baselines for instruments no longer listed. Returns the number removed.
    pub fn retain_baselines(&mut self, active: &HashSet<String>) -> usize {
        let before = self.baselines.len();
        self.baselines.retain(|id, _| active.contains(id));
        before - self.baselines.len()
    }

    pub fn baseline(&self, instrument_id: &str) -> Option<VolumeBaseline> {
        self.baselines.get(instrument_id).copied()
    }

    pub fn baseline_count(&self) -> usize {
        self.baselines.len()
    }
}

/// YES when the midpoint is above 50¢, NO below, nothing at exactly 50¢.
fn outcome_hint(mid_cents: Decimal) -> Option<String> {
    let half = MINOR_UNITS_PER_MAJOR / Decimal::TWO;
    if mid_cents <= Decimal::ZERO {
        None
    } else if mid_cents > half {
        Some("YES".to_string())
    } else if mid_cents < half {
        Some("NO".to_string())
    } else {
        None
    }
}

/// Keep only candidates the ledger has not seen, recording each as seen.
pub fn commit_novel(candidates: Vec<DetectedEvent>, ledger: &mut DedupLedger) -> Vec<DetectedEvent> {
    candidates
        .into_iter()
        .filter(|c| {
            let novel = ledger.check_and_record(&c.fingerprint);
            if !novel {
                debug!(fingerprint = %c.fingerprint, "duplicate suppressed");
            }
            novel
        })
        .collect()
}
