//! State shared between the poller (single writer) and the read API.
//!
//! The poller takes short write locks around each mutation; readers take read
//! locks and copy out what they need, so a reader never observes a
//! half-mutated container but may observe a cycle in progress.

use crate::ledger::DedupLedger;
use crate::ring::RecentEvents;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub struct MonitorState {
    pub ledger: RwLock<DedupLedger>,
    pub ring: RwLock<RecentEvents>,
    min_trade_size: Decimal,
    events_detected: AtomicU64,
    cycles_completed: AtomicU64,
    started_at: Instant,
}

impl MonitorState {
    pub fn new(ledger: DedupLedger, ring: RecentEvents, min_trade_size: Decimal) -> Self {
        Self {
            ledger: RwLock::new(ledger),
            ring: RwLock::new(ring),
            min_trade_size,
            events_detected: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn min_trade_size(&self) -> Decimal {
        self.min_trade_size
    }

    pub fn record_event(&self) {
        self.events_detected.fetch_add(1, Ordering::Relaxed);
    }

    /// Lifetime count, not bounded by the ring.
    pub fn events_detected(&self) -> u64 {
        self.events_detected.load(Ordering::Relaxed)
    }

    pub fn record_cycle(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
