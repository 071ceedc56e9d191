use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use whalewatch::config::Config;
use whalewatch::detector::EventDetector;
use whalewatch::enrich::PolygonscanLookup;
use whalewatch::ledger::DedupLedger;
use whalewatch::notify::{NotificationSink, Notifier, WebhookSink};
use whalewatch::poller::{PollSettings, Poller};
use whalewatch::ring::RecentEvents;
use whalewatch::source::{http_client, ChainLogSource, ClobBookSource, MarketSource, TradeFeedSource};
use whalewatch::state::MonitorState;

const CONFIG_FILE: &str = "whalewatch.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config_path = Path::new(CONFIG_FILE);
    let from_file = config_path.exists();
    let config = if from_file {
        Config::load(config_path)?
    } else {
        Config::from_env()?
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("whalewatch v{} starting", env!("CARGO_PKG_VERSION"));
    if !from_file {
        info!("no {} found, using env-only config", CONFIG_FILE);
    }
    info!(
        min_trade_size = %config.detection.min_trade_size,
        volume_spike_threshold = %config.detection.volume_spike_threshold,
        interval_ms = config.poll.interval_ms,
        request_delay_ms = config.poll.request_delay_ms,
        "detection thresholds"
    );

    // --- Sources ---
    let mut sources: Vec<Box<dyn MarketSource>> = Vec::new();
    let pm = &config.polymarket;
    if pm.books_enabled {
        let http = http_client(config.poll.request_timeout())?;
        sources.push(Box::new(
            ClobBookSource::new(http, pm.gamma_url.clone(), pm.clob_url.clone(), pm.max_markets)
                .with_page_delay(config.poll.request_delay()),
        ));
    }
    if pm.trades_enabled {
        let http = http_client(config.poll.request_timeout())?;
        sources.push(Box::new(
            TradeFeedSource::new(
                http,
                pm.gamma_url.clone(),
                pm.data_api_url.clone(),
                pm.max_markets,
            )
            .with_page_delay(config.poll.request_delay()),
        ));
    }
    if config.onchain.enabled {
        match ChainLogSource::new(
            &config.onchain.rpc_url,
            &config.onchain.exchanges,
            config.onchain.max_block_span,
        ) {
            Ok(source) => sources.push(Box::new(source)),
            Err(e) => error!(error = %e, rpc = %config.onchain.rpc_url, "on-chain source disabled"),
        }
    }
    if sources.is_empty() {
        anyhow::bail!("no market sources enabled");
    }
    info!(
        sources = ?sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
        "market sources configured"
    );

    // --- Notifications ---
    let sink: Option<Arc<dyn NotificationSink>> = if config.notifications_enabled() {
        let timeout = std::time::Duration::from_secs(config.notify.timeout_secs);
        let sink = WebhookSink::new(config.notify.webhook_url.clone(), timeout)
            .context("failed to build webhook client")?;
        info!("webhook notifications enabled");
        Some(Arc::new(sink))
    } else {
        warn!("no WEBHOOK_URL configured - events are logged and served but not forwarded");
        None
    };
    let notifier = Notifier::new(
        sink,
        config.detection.min_trade_size,
        config.detection.volume_spike_threshold,
    );

    // --- Shared state ---
    let state = Arc::new(MonitorState::new(
        DedupLedger::new(
            config.retention.max_fingerprints,
            config.retention.compact_target,
        ),
        RecentEvents::new(config.retention.max_recent_events),
        config.detection.min_trade_size,
    ));

    // --- Read API ---
    let listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("failed to bind read API on {}", config.api.bind))?;
    let api_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = whalewatch::api::serve(api_state, listener).await {
            error!(error = %e, "read API stopped");
        }
    });

    // --- Poller ---
    let detector = EventDetector::new(
        config.detection.min_trade_size,
        config.detection.volume_spike_threshold,
    );
    let mut poller = Poller::new(
        sources,
        detector,
        notifier,
        state.clone(),
        PollSettings::from(&config.poll),
    );
    if config.has_enrichment_key() {
        let lookup = PolygonscanLookup::new(
            config.enrichment.polygonscan_url.clone(),
            config.enrichment.polygonscan_api_key.clone(),
            config.poll.request_timeout(),
        )
        .context("failed to build polygonscan client")?;
        info!("wallet-age enrichment enabled");
        poller = poller.with_enricher(Arc::new(lookup));
    }

    poller.run(config.poll.interval(), shutdown_signal()).await;

    info!(
        events_detected = state.events_detected(),
        ledger_size = state.ledger.read().await.len(),
        "shutting down"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
