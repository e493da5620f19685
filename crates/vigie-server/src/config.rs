//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Upstream vigilance feed settings.
    #[serde(default)]
    pub feed: FeedConfig,

    /// Notification provider settings.
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Payment gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "vigie_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Upstream vigilance feed configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Base URL of the vigilance feed API.
    #[serde(default = "default_feed_base_url")]
    pub base_url: String,

    /// Region identifier passed to the feed.
    #[serde(default = "default_feed_region")]
    pub region: String,

    /// Seconds between scheduler polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Per-request feed timeout in seconds.
    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,
}

/// Notification provider (Brevo) configuration.
///
/// An empty `api_key` selects demo mode: dispatches are logged, not sent.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub api_key: String,

    /// Alphanumeric SMS sender name.
    #[serde(default = "default_sms_sender")]
    pub sms_sender: String,

    #[serde(default = "default_email_sender_name")]
    pub email_sender_name: String,

    #[serde(default = "default_email_sender_address")]
    pub email_sender_address: String,

    /// Provider API base URL.
    #[serde(default = "default_notifier_base_url")]
    pub base_url: String,
}

/// Payment gateway (Stripe) configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub secret_key: String,

    /// Shared secret for webhook signature verification.
    #[serde(default)]
    pub webhook_secret: String,

    /// Gateway API base URL.
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "vigie.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_feed_base_url() -> String {
    "https://vigilance.example.meteo/api".to_string()
}

fn default_feed_region() -> String {
    "martinique".to_string()
}

fn default_poll_interval_secs() -> u64 {
    900
}

fn default_feed_timeout_secs() -> u64 {
    15
}

fn default_sms_sender() -> String {
    "VigieAlert".to_string()
}

fn default_email_sender_name() -> String {
    "Vigie Alerts".to_string()
}

fn default_email_sender_address() -> String {
    "alerts@vigie.example".to_string()
}

fn default_notifier_base_url() -> String {
    vigie_broadcast::brevo::DEFAULT_BASE_URL.to_string()
}

fn default_gateway_base_url() -> String {
    vigie_payments::stripe::DEFAULT_BASE_URL.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
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

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_feed_base_url(),
            region: default_feed_region(),
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_feed_timeout_secs(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            sms_sender: default_sms_sender(),
            email_sender_name: default_email_sender_name(),
            email_sender_address: default_email_sender_address(),
            base_url: default_notifier_base_url(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: String::new(),
            base_url: default_gateway_base_url(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `VIGIE_HOST` overrides `server.host`
/// - `VIGIE_PORT` overrides `server.port`
/// - `VIGIE_DB_PATH` overrides `database.path`
/// - `VIGIE_LOG_LEVEL` overrides `logging.level`
/// - `VIGIE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `VIGIE_FEED_URL` overrides `feed.base_url`
/// - `VIGIE_FEED_REGION` overrides `feed.region`
/// - `VIGIE_POLL_INTERVAL_SECS` overrides `feed.poll_interval_secs`
/// - `VIGIE_BREVO_API_KEY` overrides `notifier.api_key`
/// - `VIGIE_SMS_SENDER` overrides `notifier.sms_sender`
/// - `VIGIE_STRIPE_SECRET_KEY` overrides `gateway.secret_key`
/// - `VIGIE_WEBHOOK_SECRET` overrides `gateway.webhook_secret`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("VIGIE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("VIGIE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("VIGIE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("VIGIE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("VIGIE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(url) = std::env::var("VIGIE_FEED_URL") {
        config.feed.base_url = url;
    }
    if let Ok(region) = std::env::var("VIGIE_FEED_REGION") {
        config.feed.region = region;
    }
    if let Ok(secs) = std::env::var("VIGIE_POLL_INTERVAL_SECS") {
        if let Ok(parsed) = secs.parse() {
            config.feed.poll_interval_secs = parsed;
        }
    }
    if let Ok(key) = std::env::var("VIGIE_BREVO_API_KEY") {
        config.notifier.api_key = key;
    }
    if let Ok(sender) = std::env::var("VIGIE_SMS_SENDER") {
        config.notifier.sms_sender = sender;
    }
    if let Ok(key) = std::env::var("VIGIE_STRIPE_SECRET_KEY") {
        config.gateway.secret_key = key;
    }
    if let Ok(secret) = std::env::var("VIGIE_WEBHOOK_SECRET") {
        config.gateway.webhook_secret = secret;
    }

    Ok(config)
}
