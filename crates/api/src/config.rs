//! Application configuration loaded from environment variables.

use std::time::Duration;

use common::PaymentMethod;
use payments::{
    AdapterRegistry, ClickAdapter, ClickConfig, OfflineAdapter, PaymeAdapter, PaymeConfig,
    TelegramAdapter, TelegramConfig,
};

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset means in-memory
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default 10)
/// - `OUTBOUND_TIMEOUT_MS`: bound on provider and notification calls
///   (default 5000)
/// - `CLICK_*`, `PAYME_*`, `TELEGRAM_*`: provider credentials
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub outbound_timeout: Duration,
    pub click: ClickConfig,
    pub payme: PaymeConfig,
    pub telegram: TelegramConfig,
    pub telegram_bot_token: Option<String>,
    pub telegram_notify_chat_id: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: var("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: var("DATABASE_URL"),
            database_max_connections: var("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.parse().ok())
                .unwrap_or(defaults.database_max_connections),
            outbound_timeout: var("OUTBOUND_TIMEOUT_MS")
                .and_then(|ms| ms.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbound_timeout),
            click: ClickConfig {
                service_id: var("CLICK_SERVICE_ID").unwrap_or_default(),
                merchant_id: var("CLICK_MERCHANT_ID").unwrap_or_default(),
                secret_key: var("CLICK_SECRET_KEY").unwrap_or_default(),
            },
            payme: PaymeConfig {
                merchant_id: var("PAYME_MERCHANT_ID").unwrap_or_default(),
                key: var("PAYME_KEY").unwrap_or_default(),
            },
            telegram: TelegramConfig {
                bot_username: var("TELEGRAM_BOT_USERNAME").unwrap_or_default(),
                webhook_secret: var("TELEGRAM_WEBHOOK_SECRET").unwrap_or_default(),
                ..TelegramConfig::default()
            },
            telegram_bot_token: var("TELEGRAM_BOT_TOKEN"),
            telegram_notify_chat_id: var("TELEGRAM_NOTIFY_CHAT_ID"),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Adapters for every supported payment method.
    pub fn adapters(&self) -> AdapterRegistry {
        AdapterRegistry::new()
            .with(ClickAdapter::new(self.click.clone()))
            .with(PaymeAdapter::new(self.payme.clone()))
            .with(TelegramAdapter::new(self.telegram.clone()))
            .with(OfflineAdapter::new(PaymentMethod::Cash))
            .with(OfflineAdapter::new(PaymentMethod::Card))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            database_max_connections: 10,
            outbound_timeout: Duration::from_millis(5000),
            click: ClickConfig::default(),
            payme: PaymeConfig::default(),
            telegram: TelegramConfig::default(),
            telegram_bot_token: None,
            telegram_notify_chat_id: None,
        }
    }
}
