use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid env var {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub polymarket: PolymarketConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub onchain: OnChainConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolymarketConfig {
    /// Gamma API URL (market listing)
    #[serde(default = "default_gamma_url")]
    pub gamma_url: String,
    /// CLOB REST API base URL (order books)
    #[serde(default = "default_clob_url")]
    pub clob_url: String,
    /// Data API base URL (trade feed)
    #[serde(default = "default_data_api_url")]
    pub data_api_url: String,
    /// Poll CLOB order books for large resting orders.
    #[serde(default = "default_true")]
    pub books_enabled: bool,
    /// Poll the public trade feed for large fills.
    #[serde(default)]
    pub trades_enabled: bool,
    /// Markets listed per cycle, highest volume first.
    #[serde(default = "default_max_markets")]
    pub max_markets: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Minimum notional in USD for a single order or fill.
    #[serde(default = "default_min_trade_size")]
    pub min_trade_size: Decimal,
    /// Minimum cumulative-volume increase between two polls.
    #[serde(default = "default_volume_spike_threshold")]
    pub volume_spike_threshold: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Delay between the end of one cycle and the start of the next.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Minimum delay between consecutive upstream requests.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    /// Minimum delay between consecutive webhook sends.
    #[serde(default = "default_notify_delay_ms")]
    pub notify_delay_ms: u64,
    /// Upper bound on any single upstream call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Ledger size that triggers compaction.
    #[serde(default = "default_max_fingerprints")]
    pub max_fingerprints: usize,
    /// Fingerprints kept after compaction (most recent first).
    #[serde(default = "default_compact_target")]
    pub compact_target: usize,
    /// Events kept for the read API.
    #[serde(default = "default_max_recent_events")]
    pub max_recent_events: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Webhook endpoint. Empty disables notifications.
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default = "default_polygonscan_url")]
    pub polygonscan_url: String,
    /// Loaded from env POLYGONSCAN_API_KEY. Empty disables wallet-age lookups.
    #[serde(default)]
    pub polygonscan_api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OnChainConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Polygon JSON-RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    /// Exchange contracts whose OrderFilled logs are scanned.
    #[serde(default = "default_exchanges")]
    pub exchanges: Vec<String>,
    /// Widest block range requested in one eth_getLogs call.
    #[serde(default = "default_max_block_span")]
    pub max_block_span: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}
fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}
fn default_data_api_url() -> String {
    "https://data-api.polymarket.com".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_markets() -> usize {
    50
}
fn default_min_trade_size() -> Decimal {
    Decimal::from(5_000)
}
fn default_volume_spike_threshold() -> Decimal {
    Decimal::from(25_000)
}
fn default_interval_ms() -> u64 {
    60_000
}
fn default_request_delay_ms() -> u64 {
    250
}
fn default_notify_delay_ms() -> u64 {
    1_000
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_max_fingerprints() -> usize {
    10_000
}
fn default_compact_target() -> usize {
    5_000
}
fn default_max_recent_events() -> usize {
    100
}
fn default_notify_timeout_secs() -> u64 {
    5
}
fn default_polygonscan_url() -> String {
    "https://api.polygonscan.com/api".to_string()
}
fn default_rpc_url() -> String {
    "https://polygon-rpc.com".to_string()
}
fn default_exchanges() -> Vec<String> {
    vec![
        // CTF Exchange
        "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E".to_string(),
        // Neg Risk CTF Exchange
        "0xC5d563A36AE78145C45a50134d48A1215220f80a".to_string(),
    ]
}
fn default_max_block_span() -> u64 {
    500
}
fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PolymarketConfig {
    fn default() -> Self {
        Self {
            gamma_url: default_gamma_url(),
            clob_url: default_clob_url(),
            data_api_url: default_data_api_url(),
            books_enabled: true,
            trades_enabled: false,
            max_markets: default_max_markets(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_trade_size: default_min_trade_size(),
            volume_spike_threshold: default_volume_spike_threshold(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            request_delay_ms: default_request_delay_ms(),
            notify_delay_ms: default_notify_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_fingerprints: default_max_fingerprints(),
            compact_target: default_compact_target(),
            max_recent_events: default_max_recent_events(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            polygonscan_url: default_polygonscan_url(),
            polygonscan_api_key: String::new(),
        }
    }
}

impl Default for OnChainConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rpc_url: default_rpc_url(),
            exchanges: default_exchanges(),
            max_block_span: default_max_block_span(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn notify_delay(&self) -> Duration {
        Duration::from_millis(self.notify_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides (no file needed).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay deploy knobs and secrets. `lookup` is `std::env::var` outside tests.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "MIN_TRADE_SIZE")? {
            self.detection.min_trade_size = v;
        }
        if let Some(v) = parse_var(&lookup, "VOLUME_SPIKE_THRESHOLD")? {
            self.detection.volume_spike_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "POLL_INTERVAL_MS")? {
            self.poll.interval_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "REQUEST_DELAY_MS")? {
            self.poll.request_delay_ms = v;
        }
        if let Some(url) = lookup("WEBHOOK_URL").or_else(|| lookup("DISCORD_WEBHOOK_URL")) {
            self.notify.webhook_url = url.trim().to_string();
        }
        if let Some(key) = lookup("POLYGONSCAN_API_KEY") {
            self.enrichment.polygonscan_api_key = key.trim().to_string();
        }
        if let Some(url) = lookup("POLYGON_RPC_URL") {
            self.onchain.rpc_url = url;
            self.onchain.enabled = true;
        }
        if let Some(port) = parse_var::<u16, _>(&lookup, "PORT")? {
            self.api.bind = format!("0.0.0.0:{port}");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.min_trade_size <= Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "detection.min_trade_size must be positive".to_string(),
            ));
        }
        if self.detection.volume_spike_threshold <= Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "detection.volume_spike_threshold must be positive".to_string(),
            ));
        }
        if self.retention.compact_target >= self.retention.max_fingerprints {
            return Err(ConfigError::Invalid(format!(
                "retention.compact_target ({}) must be below retention.max_fingerprints ({})",
                self.retention.compact_target, self.retention.max_fingerprints
            )));
        }
        if self.retention.max_recent_events == 0 {
            return Err(ConfigError::Invalid(
                "retention.max_recent_events must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn notifications_enabled(&self) -> bool {
        !self.notify.webhook_url.is_empty()
    }

    pub fn has_enrichment_key(&self) -> bool {
        !self.enrichment.polygonscan_api_key.is_empty()
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value: raw,
            }),
    }
}
