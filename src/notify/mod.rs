//! Outbound alerts for accepted events.
//!
//! The notifier formats a [`DetectedEvent`] into an [`AlertMessage`] and hands
//! it to a [`NotificationSink`]. Delivery is best-effort: failures are logged
//! and reported as [`NotifyOutcome::Failed`], never returned as errors, and
//! the event stays recorded in the ledger and ring either way. Pacing between
//! sends is the caller's job.

use crate::detector::{DetectedEvent, DetectionKind};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    Status(u16),
}

/// Severity level for an alert, by notional as a multiple of its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn from_multiple(value: Decimal, threshold: Decimal) -> Self {
        if threshold <= Decimal::ZERO {
            return Severity::Low;
        }
        let multiple = value.checked_div(threshold).unwrap_or(Decimal::MAX);
        if multiple >= Decimal::TEN {
            Severity::High
        } else if multiple >= Decimal::from(5) {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn color(&self) -> u32 {
        match self {
            Severity::Low => 0x3498db,
            Severity::Medium => 0xf1c40f,
            Severity::High => 0xe74c3c,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MED"),
            Severity::High => write!(f, "HIGH"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Channel-agnostic alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertMessage {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub fields: Vec<AlertField>,
    pub url: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    SkippedNoEndpoint,
    Failed,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError>;
}

/// Discord-compatible webhook sink.
pub struct WebhookSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }

    pub fn payload(message: &AlertMessage) -> serde_json::Value {
        let fields: Vec<serde_json::Value> = message
            .fields
            .iter()
            .map(|f| serde_json::json!({ "name": f.name, "value": f.value, "inline": f.inline }))
            .collect();
        let mut embed = serde_json::json!({
            "title": message.title,
            "description": message.description,
            "color": message.severity.color(),
            "fields": fields,
            "timestamp": message.timestamp,
        });
        if let Some(url) = &message.url {
            embed["url"] = serde_json::Value::String(url.clone());
        }
        serde_json::json!({ "embeds": [embed] })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&Self::payload(message))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

pub struct Notifier {
    sink: Option<Arc<dyn NotificationSink>>,
    min_trade_size: Decimal,
    volume_spike_threshold: Decimal,
}

impl Notifier {
    pub fn new(
        sink: Option<Arc<dyn NotificationSink>>,
        min_trade_size: Decimal,
        volume_spike_threshold: Decimal,
    ) -> Self {
        Self {
            sink,
            min_trade_size,
            volume_spike_threshold,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub async fn notify(&self, event: &DetectedEvent) -> NotifyOutcome {
        let sink = match &self.sink {
            Some(s) => s,
            None => return NotifyOutcome::SkippedNoEndpoint,
        };

        let message = self.format(event);
        match sink.send(&message).await {
            Ok(()) => {
                info!(
                    severity = %message.severity,
                    market = %truncate(&event.display_name, 50),
                    notional = %event.notional_value.round_dp(2),
                    "alert sent"
                );
                NotifyOutcome::Sent
            }
            Err(e) => {
                warn!(
                    error = %e,
                    fingerprint = %event.fingerprint,
                    "alert delivery failed"
                );
                NotifyOutcome::Failed
            }
        }
    }

    pub fn format(&self, event: &DetectedEvent) -> AlertMessage {
        let threshold = match event.detection_kind {
            DetectionKind::ThresholdOrder => self.min_trade_size,
            DetectionKind::VolumeSpike => self.volume_spike_threshold,
        };
        let severity = Severity::from_multiple(event.notional_value, threshold);

        let (title, description) = match event.detection_kind {
            DetectionKind::ThresholdOrder => (
                format!("Large order: ${:.2}", event.notional_value),
                format!(
                    "{} {} shares @ {:.2}¢ on {}",
                    event.side,
                    event.quantity.normalize(),
                    event.unit_price,
                    event.display_name
                ),
            ),
            DetectionKind::VolumeSpike => (
                format!("Volume spike: +${:.2}", event.notional_value),
                format!("Traded volume jumped on {}", event.display_name),
            ),
        };

        let mut fields = vec![
            AlertField {
                name: "Side".to_string(),
                value: event.side.clone(),
                inline: true,
            },
            AlertField {
                name: "Notional".to_string(),
                value: format!("${:.2}", event.notional_value),
                inline: true,
            },
        ];
        if event.unit_price > Decimal::ZERO {
            fields.push(AlertField {
                name: "Price".to_string(),
                value: format!("{:.2}¢", event.unit_price),
                inline: true,
            });
        }
        if let Some(hint) = &event.outcome_hint {
            fields.push(AlertField {
                name: "Leaning".to_string(),
                value: hint.clone(),
                inline: true,
            });
        }
        if let Some(wallet) = &event.wallet {
            let age = event
                .wallet_age_days
                .map(|d| format!("{d} days"))
                .unwrap_or_else(|| "unknown".to_string());
            fields.push(AlertField {
                name: "Wallet".to_string(),
                value: format!("{wallet} (age: {age})"),
                inline: false,
            });
        }
        fields.push(AlertField {
            name: "Source".to_string(),
            value: event.source.clone(),
            inline: true,
        });

        debug!(title = %title, severity = %severity, "formatted alert");

        AlertMessage {
            title,
            description,
            severity,
            fields,
            url: event.link.clone(),
            timestamp: event.observed_at.to_rfc3339(),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
