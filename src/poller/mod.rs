//! Poll scheduler.
//!
//! One cycle walks every source:
//!
//! ```text
//! IDLE -> FETCH_SOURCES -> (per instrument: FETCH_SNAPSHOT -> DETECT -> NOTIFY) -> COMPACT -> IDLE
//! ```
//!
//! `Poller::run_once` performs exactly one cycle and is what the tests drive.
//! `Poller::run` repeats it with a fixed sleep after each completed cycle, so a
//! slow cycle delays the next one and cycles never overlap.
//!
//! Failures are isolated per unit of work: a source that cannot list is
//! skipped, an instrument whose snapshot fails is skipped, a notification that
//! fails is logged. Only a cycle in which no source could list at all is
//! aborted, and even then no state is discarded.

use crate::config::PollConfig;
use crate::detector::{commit_novel, DetectedEvent, EventDetector};
use crate::enrich::WalletAgeLookup;
use crate::notify::{Notifier, NotifyOutcome};
use crate::source::{Instrument, MarketSource, SourceError, SourceKind};
use crate::state::MonitorState;
use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum PollError {
    #[error("no source could list instruments ({failed} failed)")]
    NoSources { failed: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub request_delay: Duration,
    pub notify_delay: Duration,
    pub request_timeout: Duration,
}

impl From<&PollConfig> for PollSettings {
    fn from(config: &PollConfig) -> Self {
        Self {
            request_delay: config.request_delay(),
            notify_delay: config.notify_delay(),
            request_timeout: config.request_timeout(),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub sources_listed: usize,
    pub sources_failed: usize,
    pub instruments: usize,
    pub snapshots_failed: usize,
    /// Log-source fetches that only established a starting position.
    pub positions_established: usize,
    pub candidates: usize,
    pub events: usize,
    pub notified: usize,
    pub notify_failed: usize,
    pub compacted: usize,
    pub baselines_evicted: usize,
    pub ledger_size: usize,
}

/// Enforces a minimum gap between consecutive calls.
struct Pacer {
    delay: Duration,
    last: Option<Instant>,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    async fn wait(&mut self) {
        if let Some(prev) = self.last {
            let elapsed = prev.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

pub struct Poller {
    sources: Vec<Box<dyn MarketSource>>,
    detector: EventDetector,
    notifier: Notifier,
    enricher: Option<Arc<dyn WalletAgeLookup>>,
    state: Arc<MonitorState>,
    settings: PollSettings,
    /// (source index, instrument id) pairs whose log position is established.
    positioned: HashSet<(usize, String)>,
    requests: Pacer,
    notifications: Pacer,
}

impl Poller {
    pub fn new(
        sources: Vec<Box<dyn MarketSource>>,
        detector: EventDetector,
        notifier: Notifier,
        state: Arc<MonitorState>,
        settings: PollSettings,
    ) -> Self {
        Self {
            sources,
            detector,
            notifier,
            enricher: None,
            state,
            settings,
            positioned: HashSet::new(),
            requests: Pacer::new(settings.request_delay),
            notifications: Pacer::new(settings.notify_delay),
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn WalletAgeLookup>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn state(&self) -> &Arc<MonitorState> {
        &self.state
    }

    pub fn detector(&self) -> &EventDetector {
        &self.detector
    }

    /// Run a single cycle.
    pub async fn run_once(&mut self) -> Result<CycleReport, PollError> {
        let Self {
            sources,
            detector,
            notifier,
            enricher,
            state,
            settings,
            positioned,
            requests,
            notifications,
        } = self;
        let timeout = settings.request_timeout;
        let mut report = CycleReport::default();

        // --- FETCH_SOURCES ---
        let mut listings: Vec<(usize, Vec<Instrument>)> = Vec::new();
        for (idx, source) in sources.iter().enumerate() {
            requests.wait().await;
            match bounded(timeout, source.list_instruments()).await {
                Ok(instruments) => {
                    debug!(source = source.name(), instruments = instruments.len(), "listed instruments");
                    listings.push((idx, instruments));
                }
                Err(e) => {
                    warn!(
                        source = source.name(),
                        transient = e.is_transient(),
                        error = %e,
                        "listing failed, skipping source this cycle"
                    );
                    report.sources_failed += 1;
                }
            }
        }
        if listings.is_empty() {
            error!(failed = report.sources_failed, "no source listed, cycle aborted");
            return Err(PollError::NoSources {
                failed: report.sources_failed,
            });
        }
        report.sources_listed = listings.len();

        // --- FETCH_SNAPSHOT -> DETECT -> NOTIFY ---
        for (idx, instruments) in &listings {
            let source = &sources[*idx];
            let is_log = source.kind() == SourceKind::Log;

            for instrument in instruments {
                report.instruments += 1;
                requests.wait().await;
                let snapshot = match bounded(timeout, source.fetch_snapshot(instrument)).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(
                            source = source.name(),
                            instrument = %instrument.id,
                            transient = e.is_transient(),
                            error = %e,
                            "snapshot failed, skipping instrument this cycle"
                        );
                        report.snapshots_failed += 1;
                        continue;
                    }
                };

                if is_log && positioned.insert((*idx, instrument.id.clone())) {
                    info!(
                        source = source.name(),
                        instrument = %instrument.id,
                        discarded = snapshot.orders.len(),
                        "log position established"
                    );
                    report.positions_established += 1;
                    continue;
                }

                let candidates = detector.detect(source.name(), instrument, &snapshot, Utc::now());
                report.candidates += candidates.len();
                if candidates.is_empty() {
                    continue;
                }
                let novel = {
                    let mut ledger = state.ledger.write().await;
                    commit_novel(candidates, &mut ledger)
                };

                for mut event in novel {
                    if let Some(lookup) = enricher.as_ref().filter(|_| event.wallet.is_some()) {
                        requests.wait().await;
                        enrich(lookup.as_ref(), &mut event, timeout).await;
                    }
                    log_event(&event);
                    state.ring.write().await.push(event.clone());
                    state.record_event();
                    report.events += 1;

                    if notifier.is_enabled() {
                        notifications.wait().await;
                    }
                    let delivery = tokio::time::timeout(timeout, notifier.notify(&event));
                    let outcome = match delivery.await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            warn!(
                                fingerprint = %event.fingerprint,
                                timeout_ms = timeout.as_millis() as u64,
                                "alert delivery timed out"
                            );
                            NotifyOutcome::Failed
                        }
                    };
                    match outcome {
                        NotifyOutcome::Sent => report.notified += 1,
                        NotifyOutcome::Failed => report.notify_failed += 1,
                        NotifyOutcome::SkippedNoEndpoint => {}
                    }
                }
            }
        }

        // --- COMPACT ---
        {
            let mut ledger = state.ledger.write().await;
            if ledger.needs_compaction() {
                report.compacted = ledger.compact();
                info!(
                    evicted = report.compacted,
                    remaining = ledger.len(),
                    "dedup ledger compacted"
                );
            }
            report.ledger_size = ledger.len();
        }

        // Baselines are only pruned against a complete listing.
        if report.sources_failed == 0 {
            let active: HashSet<String> = listings
                .iter()
                .flat_map(|(_, instruments)| instruments.iter().map(|i| i.id.clone()))
                .collect();
            report.baselines_evicted = detector.retain_baselines(&active);
        }

        state.record_cycle();
        Ok(report)
    }

    /// Repeat `run_once` until `shutdown` resolves, sleeping `interval` after
    /// each completed cycle. An in-flight cycle is dropped on shutdown.
    pub async fn run<S>(mut self, interval: Duration, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            sources = self.sources.len(),
            interval_ms = interval.as_millis() as u64,
            "poller started"
        );

        loop {
            let started = Instant::now();
            tokio::select! {
                _ = &mut shutdown => break,
                result = self.run_once() => match result {
                    Ok(report) => info!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        instruments = report.instruments,
                        snapshot_failures = report.snapshots_failed,
                        events = report.events,
                        notified = report.notified,
                        ledger = report.ledger_size,
                        "poll cycle complete"
                    ),
                    Err(e) => warn!(error = %e, "poll cycle aborted"),
                },
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        let ledger_size = self.state.ledger.read().await.len();
        info!(
            events_detected = self.state.events_detected(),
            ledger_size = ledger_size,
            cycles = self.state.cycles_completed(),
            "poller stopped"
        );
    }
}

async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, SourceError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(timeout)),
    }
}

async fn enrich(lookup: &dyn WalletAgeLookup, event: &mut DetectedEvent, timeout: Duration) {
    let wallet = match &event.wallet {
        Some(w) => w.clone(),
        None => return,
    };
    event.wallet_age_days = tokio::time::timeout(timeout, lookup.wallet_age_days(&wallet))
        .await
        .unwrap_or(None);
}

fn log_event(event: &DetectedEvent) {
    info!(
        kind = %event.detection_kind,
        source = %event.source,
        market = %event.display_name,
        side = %event.side,
        price = %event.unit_price,
        notional = %event.notional_value.round_dp(2),
        wallet_age_days = ?event.wallet_age_days,
        "EVENT DETECTED"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::DedupLedger;
    use crate::notify::{AlertMessage, NotificationSink, NotifyError};
    use crate::ring::RecentEvents;
    use crate::source::{RawObservation, Snapshot};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn obs(instrument: &str, price: i64, qty: i64) -> RawObservation {
        RawObservation {
            instrument_id: instrument.to_string(),
            side: "BID".to_string(),
            unit_price: Decimal::from(price),
            quantity: Decimal::from(qty),
            observed_at: Utc::now(),
            wallet: None,
        }
    }

    /// Book-style source: every fetch returns the configured orders.
    struct FakeBooks {
        name: String,
        instruments: Mutex<Vec<Instrument>>,
        books: Mutex<HashMap<String, Vec<RawObservation>>>,
        fail_listing: bool,
        failing: HashSet<String>,
        fetches: AtomicUsize,
    }

    impl FakeBooks {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                instruments: Mutex::new(Vec::new()),
                books: Mutex::new(HashMap::new()),
                fail_listing: false,
                failing: HashSet::new(),
                fetches: AtomicUsize::new(0),
            }
        }

        fn with_book(self, id: &str, orders: Vec<RawObservation>) -> Self {
            self.instruments.lock().unwrap().push(Instrument::new(id, format!("Market {id}")));
            self.books.lock().unwrap().insert(id.to_string(), orders);
            self
        }

        fn failing_on(mut self, id: &str) -> Self {
            self.failing.insert(id.to_string());
            self
        }
    }

    #[async_trait]
    impl MarketSource for FakeBooks {
        fn name(&self) -> &str {
            &self.name
        }

        async fn list_instruments(&self) -> Result<Vec<Instrument>, SourceError> {
            if self.fail_listing {
                return Err(SourceError::Status(503));
            }
            Ok(self.instruments.lock().unwrap().clone())
        }

        async fn fetch_snapshot(&self, instrument: &Instrument) -> Result<Snapshot, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.contains(&instrument.id) {
                return Err(SourceError::Status(502));
            }
            let orders = self
                .books
                .lock()
                .unwrap()
                .get(&instrument.id)
                .cloned()
                .unwrap_or_default();
            Ok(Snapshot {
                orders,
                volume: None,
                mid_price: None,
            })
        }
    }

    /// Log-style source: each fetch drains the entries appended since the last.
    struct FakeLog {
        pending: Mutex<Vec<RawObservation>>,
    }

    #[async_trait]
    impl MarketSource for FakeLog {
        fn name(&self) -> &str {
            "log"
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Log
        }

        async fn list_instruments(&self) -> Result<Vec<Instrument>, SourceError> {
            Ok(vec![Instrument::new("exchange", "Exchange")])
        }

        async fn fetch_snapshot(&self, _instrument: &Instrument) -> Result<Snapshot, SourceError> {
            Ok(Snapshot {
                orders: std::mem::take(&mut *self.pending.lock().unwrap()),
                volume: None,
                mid_price: None,
            })
        }
    }

    struct Stalled;

    #[async_trait]
    impl MarketSource for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn list_instruments(&self) -> Result<Vec<Instrument>, SourceError> {
            Ok(vec![Instrument::new("slow", "Slow")])
        }

        async fn fetch_snapshot(&self, _instrument: &Instrument) -> Result<Snapshot, SourceError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct CountingSink {
        attempts: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for CountingSink {
        async fn send(&self, _message: &AlertMessage) -> Result<(), NotifyError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Status(500))
            } else {
                Ok(())
            }
        }
    }

    fn settings() -> PollSettings {
        PollSettings {
            request_delay: Duration::ZERO,
            notify_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
        }
    }

    fn poller_with(
        sources: Vec<Box<dyn MarketSource>>,
        sink: Option<Arc<CountingSink>>,
        ledger: DedupLedger,
    ) -> Poller {
        let min = Decimal::from(200);
        let spike = Decimal::from(1_000);
        let state = Arc::new(MonitorState::new(ledger, RecentEvents::new(100), min));
        let sink = sink.map(|s| s as Arc<dyn NotificationSink>);
        Poller::new(
            sources,
            EventDetector::new(min, spike),
            Notifier::new(sink, min, spike),
            state,
            settings(),
        )
    }

    fn poller(sources: Vec<Box<dyn MarketSource>>, sink: Option<Arc<CountingSink>>) -> Poller {
        poller_with(sources, sink, DedupLedger::new(1_000, 500))
    }

    #[tokio::test]
    async fn test_same_order_across_cycles_alerts_once() {
        let sink = Arc::new(CountingSink::default());
        let source = FakeBooks::new("books").with_book("X", vec![obs("X", 42, 500)]);
        let mut poller = poller(vec![Box::new(source)], Some(sink.clone()));

        let first = poller.run_once().await.unwrap();
        let second = poller.run_once().await.unwrap();

        assert_eq!(first.events, 1);
        assert_eq!(second.events, 0);
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(poller.state().ring.read().await.len(), 1);
        assert_eq!(poller.state().events_detected(), 1);
    }

    #[tokio::test]
    async fn test_below_threshold_is_ignored() {
        let source = FakeBooks::new("books").with_book("X", vec![obs("X", 42, 476)]);
        let mut poller = poller(vec![Box::new(source)], None);
        let report = poller.run_once().await.unwrap();
        assert_eq!(report.candidates, 0);
        assert_eq!(report.events, 0);
    }

    #[tokio::test]
    async fn test_failing_source_does_not_abort_cycle() {
        let s1 = FakeBooks::new("one").with_book("A", vec![obs("A", 50, 1_000)]);
        let s2 = FakeBooks::new("two")
            .with_book("B", vec![obs("B", 50, 1_000)])
            .failing_on("B");
        let s3 = FakeBooks::new("three").with_book("C", vec![obs("C", 60, 1_000)]);
        let mut poller = poller(vec![Box::new(s1), Box::new(s2), Box::new(s3)], None);

        let report = poller.run_once().await.unwrap();
        assert_eq!(report.snapshots_failed, 1);
        assert_eq!(report.events, 2);

        let ids: Vec<String> = poller
            .state()
            .ring
            .read()
            .await
            .snapshot()
            .into_iter()
            .map(|e| e.instrument_id)
            .collect();
        assert_eq!(ids, vec!["C", "A"]);
    }

    #[tokio::test]
    async fn test_listing_failure_skips_only_that_source() {
        let mut broken = FakeBooks::new("broken").with_book("B", vec![obs("B", 50, 1_000)]);
        broken.fail_listing = true;
        let ok = FakeBooks::new("ok").with_book("A", vec![obs("A", 50, 1_000)]);
        let mut poller = poller(vec![Box::new(broken), Box::new(ok)], None);

        let report = poller.run_once().await.unwrap();
        assert_eq!(report.sources_failed, 1);
        assert_eq!(report.sources_listed, 1);
        assert_eq!(report.events, 1);
    }

    #[tokio::test]
    async fn test_no_listing_aborts_and_keeps_state() {
        let source = FakeBooks::new("books").with_book("X", vec![obs("X", 42, 500)]);
        let mut poller = poller(vec![Box::new(source)], None);
        poller.run_once().await.unwrap();

        let mut broken = FakeBooks::new("broken");
        broken.fail_listing = true;
        let state = poller.state().clone();
        let mut second = Poller::new(
            vec![Box::new(broken)],
            EventDetector::new(Decimal::from(200), Decimal::from(1_000)),
            Notifier::new(None, Decimal::from(200), Decimal::from(1_000)),
            state.clone(),
            settings(),
        );
        let err = second.run_once().await.unwrap_err();
        assert!(matches!(err, PollError::NoSources { failed: 1 }));
        assert_eq!(state.ring.read().await.len(), 1);
        assert_eq!(state.ledger.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_first_log_cycle_only_establishes_position() {
        let historical: Vec<RawObservation> =
            (1..=5).map(|n| obs("tok", 50, 1_000 * n)).collect();
        let log = Arc::new(FakeLog {
            pending: Mutex::new(historical),
        });

        struct Shared(Arc<FakeLog>);
        #[async_trait]
        impl MarketSource for Shared {
            fn name(&self) -> &str {
                self.0.name()
            }
            fn kind(&self) -> SourceKind {
                self.0.kind()
            }
            async fn list_instruments(&self) -> Result<Vec<Instrument>, SourceError> {
                self.0.list_instruments().await
            }
            async fn fetch_snapshot(&self, i: &Instrument) -> Result<Snapshot, SourceError> {
                self.0.fetch_snapshot(i).await
            }
        }

        let mut poller = poller(vec![Box::new(Shared(log.clone()))], None);

        let first = poller.run_once().await.unwrap();
        assert_eq!(first.events, 0);
        assert_eq!(first.positions_established, 1);
        assert!(poller.state().ring.read().await.is_empty());

        log.pending.lock().unwrap().push(obs("tok", 55, 4_000));
        let second = poller.run_once().await.unwrap();
        assert_eq!(second.events, 1);
        assert_eq!(second.positions_established, 0);
        let ring = poller.state().ring.read().await.snapshot();
        assert_eq!(ring[0].unit_price, Decimal::from(55));
    }

    #[tokio::test]
    async fn test_compaction_runs_when_over_cap() {
        let orders: Vec<RawObservation> = (1..=30).map(|n| obs("X", 50, 1_000 + n)).collect();
        let source = FakeBooks::new("books").with_book("X", orders);
        let mut poller = poller_with(vec![Box::new(source)], None, DedupLedger::new(20, 10));

        let report = poller.run_once().await.unwrap();
        assert_eq!(report.events, 30);
        assert_eq!(report.compacted, 20);
        assert_eq!(report.ledger_size, 10);

        // the ten newest survive; the next cycle only re-alerts evicted ones
        let again = poller.run_once().await.unwrap();
        assert_eq!(again.events, 20);
    }

    #[tokio::test]
    async fn test_notify_failure_keeps_event() {
        let sink = Arc::new(CountingSink {
            fail: true,
            ..Default::default()
        });
        let source = FakeBooks::new("books").with_book("X", vec![obs("X", 42, 500)]);
        let mut poller = poller(vec![Box::new(source)], Some(sink.clone()));

        let report = poller.run_once().await.unwrap();
        assert_eq!(report.notify_failed, 1);
        assert_eq!(report.events, 1);
        assert_eq!(poller.state().ring.read().await.len(), 1);

        // still suppressed next cycle, no retry
        poller.run_once().await.unwrap();
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_volume_first_cycle_seeds_then_spikes() {
        let source = FakeBooks::new("books").with_book("V", vec![]);
        source.instruments.lock().unwrap()[0].volume = Some(Decimal::from(1_000_000));
        let source = Arc::new(source);

        struct Shared(Arc<FakeBooks>);
        #[async_trait]
        impl MarketSource for Shared {
            fn name(&self) -> &str {
                self.0.name()
            }
            async fn list_instruments(&self) -> Result<Vec<Instrument>, SourceError> {
                self.0.list_instruments().await
            }
            async fn fetch_snapshot(&self, i: &Instrument) -> Result<Snapshot, SourceError> {
                self.0.fetch_snapshot(i).await
            }
        }

        let mut poller = poller(vec![Box::new(Shared(source.clone()))], None);
        assert_eq!(poller.run_once().await.unwrap().events, 0);

        source.instruments.lock().unwrap()[0].volume = Some(Decimal::from(1_002_000));
        let report = poller.run_once().await.unwrap();
        assert_eq!(report.events, 1);

        // delisted instrument loses its baseline
        source.instruments.lock().unwrap().clear();
        let report = poller.run_once().await.unwrap();
        assert_eq!(report.baselines_evicted, 1);
        assert_eq!(poller.detector().baseline_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_fetch_times_out() {
        let ok = FakeBooks::new("ok").with_book("A", vec![obs("A", 50, 1_000)]);
        let mut poller = poller(vec![Box::new(Stalled), Box::new(ok)], None);

        let report = poller.run_once().await.unwrap();
        assert_eq!(report.snapshots_failed, 1);
        assert_eq!(report.events, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_paced() {
        let source = FakeBooks::new("books")
            .with_book("A", vec![])
            .with_book("B", vec![])
            .with_book("C", vec![]);
        let mut poller = poller(vec![Box::new(source)], None);
        poller.requests = Pacer::new(Duration::from_millis(100));

        let started = Instant::now();
        poller.run_once().await.unwrap();
        // one listing + three snapshots = three gaps
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    struct RecordingLookup {
        calls: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl WalletAgeLookup for RecordingLookup {
        async fn wallet_age_days(&self, _address: &str) -> Option<u32> {
            self.calls.lock().unwrap().push(Instant::now());
            Some(7)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wallet_lookups_are_paced() {
        let fills: Vec<RawObservation> = (1..=5)
            .map(|n| {
                let mut fill = obs("X", 50, 1_000 + n);
                fill.wallet = Some(format!("0x{n:040x}"));
                fill
            })
            .collect();
        let source = FakeBooks::new("trades").with_book("X", fills);
        let lookup = Arc::new(RecordingLookup {
            calls: Mutex::new(Vec::new()),
        });
        let mut poller = poller(vec![Box::new(source)], None).with_enricher(lookup.clone());
        poller.requests = Pacer::new(Duration::from_millis(250));

        let report = poller.run_once().await.unwrap();
        assert_eq!(report.events, 5);

        let calls = lookup.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 5);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(250));
        }
        let ring = poller.state().ring.read().await.snapshot();
        assert!(ring.iter().all(|e| e.wallet_age_days == Some(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_orders_without_wallet_skip_lookup() {
        let source = FakeBooks::new("books").with_book("X", vec![obs("X", 42, 500)]);
        let lookup = Arc::new(RecordingLookup {
            calls: Mutex::new(Vec::new()),
        });
        let mut poller = poller(vec![Box::new(source)], None).with_enricher(lookup.clone());

        assert_eq!(poller.run_once().await.unwrap().events, 1);
        assert!(lookup.calls.lock().unwrap().is_empty());
    }

    struct HangingSink;

    #[async_trait]
    impl NotificationSink for HangingSink {
        async fn send(&self, _message: &AlertMessage) -> Result<(), NotifyError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sink_times_out() {
        let source = FakeBooks::new("books").with_book("X", vec![obs("X", 42, 500)]);
        let min = Decimal::from(200);
        let spike = Decimal::from(1_000);
        let state = Arc::new(MonitorState::new(
            DedupLedger::new(1_000, 500),
            RecentEvents::new(100),
            min,
        ));
        let mut poller = Poller::new(
            vec![Box::new(source)],
            EventDetector::new(min, spike),
            Notifier::new(Some(Arc::new(HangingSink) as Arc<dyn NotificationSink>), min, spike),
            state,
            settings(),
        );

        let report = poller.run_once().await.unwrap();
        assert_eq!(report.events, 1);
        assert_eq!(report.notify_failed, 1);
        assert_eq!(poller.state().ring.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_size_does_not_abort_cycle() {
        let mut huge = obs("X", 42, 1);
        huge.quantity = Decimal::MAX;
        let source = FakeBooks::new("books")
            .with_book("X", vec![huge, obs("X", 42, 500)]);
        let mut poller = poller(vec![Box::new(source)], None);

        let report = poller.run_once().await.unwrap();
        assert_eq!(report.candidates, 1);
        assert_eq!(report.events, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let source = FakeBooks::new("books").with_book("X", vec![obs("X", 42, 500)]);
        let poller = poller(vec![Box::new(source)], None);
        let state = poller.state().clone();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(poller.run(Duration::from_millis(10), async move {
            let _ = rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
        assert!(state.cycles_completed() >= 1);
        assert_eq!(state.events_detected(), 1);
    }
}
