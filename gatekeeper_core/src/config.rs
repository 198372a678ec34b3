use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{GateError, GateResult};
use crate::indexer::dto::TonApiConfig;
use crate::pipeline::dto::SyncConfig;

/// Process configuration. Every value comes from the environment (after
/// `dotenvy` has loaded `.env`) and falls back to a default.
#[derive(Debug, Clone)]
pub struct GatekeeperConfig {
    pub redis_url: String,
    pub sled_path: String,
    pub tonapi: TonApiConfig,
    pub tonapi_rate: u32,
    pub tonapi_period: Duration,
    pub gift_market_url: Option<String>,
    pub sticker_market_url: Option<String>,
    pub session_path: PathBuf,
    pub sync: SyncConfig,
    pub consumer_id: String,
    pub category_config_path: String,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(name: &str, default: T) -> GateResult<T> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| GateError::Config(format!("{} has invalid value '{}'", name, value))),
        Err(_) => Ok(default),
    }
}

impl GatekeeperConfig {
    pub fn from_env() -> GateResult<Self> {
        let defaults = SyncConfig::default();

        let sync = SyncConfig {
            batch_size: parse_var("SYNC_BATCH_SIZE", defaults.batch_size)?,
            concurrency: parse_var("SYNC_CONCURRENCY", defaults.concurrency)?,
            tracking_ttl: Duration::from_secs(parse_var(
                "TRACKING_TTL_SECS",
                defaults.tracking_ttl.as_secs(),
            )?),
            queue: var_or("REFRESH_QUEUE", &defaults.queue),
        };

        if sync.batch_size == 0 || sync.concurrency == 0 {
            return Err(GateError::Config(
                "SYNC_BATCH_SIZE and SYNC_CONCURRENCY must be positive".to_string(),
            ));
        }

        let tonapi = TonApiConfig {
            base_url: var_or("TONAPI_URL", "https://tonapi.io"),
            api_key: env::var("TONAPI_KEY").ok().filter(|key| !key.is_empty()),
            ..TonApiConfig::default()
        };

        Ok(Self {
            redis_url: var_or("REDIS_URL", "redis://127.0.0.1:6379"),
            sled_path: var_or("SLED_PATH", "gatekeeper_db"),
            tonapi,
            tonapi_rate: parse_var("TONAPI_RATE", 10)?,
            tonapi_period: Duration::from_millis(parse_var("TONAPI_PERIOD_MS", 1000)?),
            gift_market_url: env::var("GIFT_MARKET_URL").ok().filter(|url| !url.is_empty()),
            sticker_market_url: env::var("STICKER_MARKET_URL").ok().filter(|url| !url.is_empty()),
            session_path: PathBuf::from(var_or("SESSION_PATH", "gift_market.session")),
            sync,
            consumer_id: var_or("CONSUMER_ID", "consumer"),
            category_config_path: var_or("CATEGORY_CONFIG_PATH", "assets/categories.ron"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "REDIS_URL",
        "SLED_PATH",
        "TONAPI_URL",
        "TONAPI_KEY",
        "TONAPI_RATE",
        "TONAPI_PERIOD_MS",
        "GIFT_MARKET_URL",
        "STICKER_MARKET_URL",
        "SESSION_PATH",
        "SYNC_BATCH_SIZE",
        "SYNC_CONCURRENCY",
        "TRACKING_TTL_SECS",
        "REFRESH_QUEUE",
        "CONSUMER_ID",
        "CATEGORY_CONFIG_PATH",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = GatekeeperConfig::from_env().unwrap();

        assert_eq!(config.sled_path, "gatekeeper_db");
        assert_eq!(config.sync.batch_size, 5000);
        assert_eq!(config.sync.tracking_ttl, Duration::from_secs(315_360_000));
        assert_eq!(config.tonapi.api_key, None);
        assert_eq!(config.gift_market_url, None);
        assert_eq!(config.sticker_market_url, None);
        assert_eq!(config.category_config_path, "assets/categories.ron");
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        env::set_var("SYNC_BATCH_SIZE", "250");
        env::set_var("TONAPI_KEY", "secret");
        env::set_var("TONAPI_PERIOD_MS", "500");
        env::set_var("REFRESH_QUEUE", "wallets");
        env::set_var("STICKER_MARKET_URL", "https://stickers.example");

        let config = GatekeeperConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.sync.batch_size, 250);
        assert_eq!(config.tonapi.api_key.as_deref(), Some("secret"));
        assert_eq!(config.tonapi_period, Duration::from_millis(500));
        assert_eq!(config.sync.queue, "wallets");
        assert_eq!(
            config.sticker_market_url.as_deref(),
            Some("https://stickers.example")
        );
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_config_error() {
        clear_env();
        env::set_var("SYNC_CONCURRENCY", "many");

        let result = GatekeeperConfig::from_env();
        clear_env();

        assert!(matches!(result, Err(GateError::Config(_))));
    }
}
