//! Read-only HTTP surface over the monitor state.
//!
//! Provides:
//!   GET /events  → recent events, newest first
//!   GET /stats   → aggregates over the recent-events ring
//!   GET /health  → liveness plus lifetime counters
//!
//! Handlers only take read locks and never feed back into detection.

use crate::detector::DetectedEvent;
use crate::state::MonitorState;
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    pub events: Vec<DetectedEvent>,
    pub count: usize,
    pub config: EventsConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsConfig {
    #[serde(with = "rust_decimal::serde::float")]
    pub min_trade_size: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_events: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_volume: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub avg_event_size: Decimal,
    pub last_update: Option<DateTime<Utc>>,
    pub unique_fingerprints_tracked: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub events_detected: u64,
}

pub fn build_router(state: Arc<MonitorState>) -> Router {
    Router::new()
        .route("/events", get(api_events))
        .route("/stats", get(api_stats))
        .route("/health", get(api_health))
        .with_state(state)
}

/// Serve on an already-bound listener until the process exits.
pub async fn serve(state: Arc<MonitorState>, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "read API listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

async fn api_events(State(state): State<Arc<MonitorState>>) -> impl IntoResponse {
    let events = state.ring.read().await.snapshot();
    Json(EventsResponse {
        count: events.len(),
        events,
        config: EventsConfig {
            min_trade_size: state.min_trade_size(),
        },
    })
}

async fn api_stats(State(state): State<Arc<MonitorState>>) -> impl IntoResponse {
    let agg = state.ring.read().await.aggregate();
    let tracked = state.ledger.read().await.len();
    Json(StatsResponse {
        total_events: agg.count,
        total_volume: agg.total_notional.round_dp(2),
        avg_event_size: agg.average_notional.round_dp(2),
        last_update: agg.most_recent,
        unique_fingerprints_tracked: tracked,
    })
}

async fn api_health(State(state): State<Arc<MonitorState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.uptime().as_secs(),
        events_detected: state.events_detected(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectionKind;
    use crate::fingerprint::fingerprint;
    use crate::ledger::DedupLedger;
    use crate::ring::RecentEvents;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::TimeZone;
    use tower::ServiceExt;

    fn event(id: &str, price: i64, qty: i64, at: i64) -> DetectedEvent {
        let price = Decimal::from(price);
        let qty = Decimal::from(qty);
        DetectedEvent {
            instrument_id: id.to_string(),
            display_name: format!("Market {id}"),
            side: "BID".to_string(),
            unit_price: price,
            quantity: qty,
            notional_value: crate::detector::notional(price, qty),
            detection_kind: DetectionKind::ThresholdOrder,
            observed_at: Utc.timestamp_opt(at, 0).unwrap(),
            fingerprint: fingerprint(id, "BID", price, qty),
            source: "clob".to_string(),
            link: None,
            outcome_hint: None,
            wallet: None,
            wallet_age_days: None,
        }
    }

    async fn state_with(events: Vec<DetectedEvent>) -> Arc<MonitorState> {
        let state = Arc::new(MonitorState::new(
            DedupLedger::new(100, 50),
            RecentEvents::new(10),
            Decimal::from(200),
        ));
        for e in events {
            state.ledger.write().await.record_seen(e.fingerprint.clone());
            state.ring.write().await.push(e);
            state.record_event();
        }
        state
    }

    async fn get_json(state: Arc<MonitorState>, path: &str) -> serde_json::Value {
        let resp = build_router(state)
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_events_newest_first() {
        let state = state_with(vec![
            event("a", 42, 500, 1_700_000_000),
            event("b", 60, 1_000, 1_700_000_060),
        ])
        .await;
        let body = get_json(state, "/events").await;

        assert_eq!(body["count"], 2);
        assert_eq!(body["config"]["minTradeSize"], 200.0);
        let events = body["events"].as_array().unwrap();
        assert_eq!(events[0]["instrumentId"], "b");
        assert_eq!(events[1]["instrumentId"], "a");
        assert_eq!(events[1]["notionalValue"], 210.0);
        assert_eq!(events[1]["detectionKind"], "threshold-order");
    }

    #[tokio::test]
    async fn test_stats_empty() {
        let body = get_json(state_with(vec![]).await, "/stats").await;
        assert_eq!(body["totalEvents"], 0);
        assert_eq!(body["totalVolume"], 0.0);
        assert_eq!(body["avgEventSize"], 0.0);
        assert!(body["lastUpdate"].is_null());
        assert_eq!(body["uniqueFingerprintsTracked"], 0);
    }

    #[tokio::test]
    async fn test_stats_aggregates() {
        let state = state_with(vec![
            event("a", 42, 500, 1_700_000_000),
            event("b", 60, 1_000, 1_700_000_060),
        ])
        .await;
        let body = get_json(state, "/stats").await;
        assert_eq!(body["totalEvents"], 2);
        assert_eq!(body["totalVolume"], 810.0);
        assert_eq!(body["avgEventSize"], 405.0);
        assert_eq!(body["lastUpdate"], "2023-11-14T22:14:20Z");
        assert_eq!(body["uniqueFingerprintsTracked"], 2);
    }

    #[tokio::test]
    async fn test_health() {
        let state = state_with(vec![event("a", 42, 500, 1_700_000_000)]).await;
        let body = get_json(state, "/health").await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["eventsDetected"], 1);
        assert!(body["uptimeSeconds"].is_u64());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let resp = build_router(state_with(vec![]).await)
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
