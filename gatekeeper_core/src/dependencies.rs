use std::sync::Arc;
use std::time::Duration;

use crate::config::GatekeeperConfig;
use crate::coordination::handler::CoordinationStore;
use crate::coordination::redis_store::RedisCoordinationStore;
use crate::custom_filters::dto::CategoryAddresses;
use crate::eligibility::handler::{EligibilityAggregator, RuleEvaluator};
use crate::error::GateResult;
use crate::external_source::dto::FetcherConfig;
use crate::external_source::handler::ExternalSourceFetcher;
use crate::holdings::storage::HoldingsStorage;
use crate::indexer::dto::HttpTimeouts;
use crate::indexer::gift_market::GiftMarketClient;
use crate::indexer::sticker_market::StickerMarketClient;
use crate::indexer::tonapi::TonApiIndexer;
use crate::pipeline::handler::OwnershipSyncPipeline;
use crate::rate_limit::TokenBucket;
use crate::rules::storage::RuleStorage;
use crate::session_lock::handler::SessionLockManager;

const EXTERNAL_SOURCE_RATE: u32 = 20;
const GIFT_MARKET_RATE: u32 = 5;
const STICKER_MARKET_RATE: u32 = 10;

/// Everything a gatekeeper process shares across its tasks.
#[derive(Clone)]
pub struct GatekeeperDependencies {
    pub db: sled::Db,
    pub rules: RuleStorage,
    pub holdings: HoldingsStorage,
    pub store: Arc<dyn CoordinationStore>,
    pub aggregator: EligibilityAggregator,
    pub pipeline: OwnershipSyncPipeline,
}

impl GatekeeperDependencies {
    pub async fn from_config(config: &GatekeeperConfig) -> GateResult<Self> {
        let db = sled::open(&config.sled_path)?;
        let store = RedisCoordinationStore::connect(&config.redis_url).await?;

        Self::build(config, db, Arc::new(store))
    }

    pub fn build(
        config: &GatekeeperConfig,
        db: sled::Db,
        store: Arc<dyn CoordinationStore>,
    ) -> GateResult<Self> {
        let rules = RuleStorage::new(db.clone())?;
        let holdings = HoldingsStorage::new(&db)?;

        let categories = Arc::new(CategoryAddresses::from_file(&config.category_config_path)?);
        let evaluator = RuleEvaluator::new(holdings.clone(), categories);
        let aggregator = EligibilityAggregator::new(rules.clone(), holdings.clone(), evaluator);

        let indexer = TonApiIndexer::new(
            config.tonapi.clone(),
            TokenBucket::new("tonapi", config.tonapi_rate, config.tonapi_period),
        )?;
        let fetcher = ExternalSourceFetcher::new(
            &FetcherConfig::default(),
            TokenBucket::new("external_source", EXTERNAL_SOURCE_RATE, Duration::from_secs(1)),
        )?;

        let mut pipeline = OwnershipSyncPipeline::new(
            store.clone(),
            holdings.clone(),
            rules.clone(),
            Arc::new(indexer),
            fetcher,
            config.sync.clone(),
        );

        match &config.gift_market_url {
            Some(url) => {
                let client = GiftMarketClient::new(
                    url,
                    config.session_path.clone(),
                    &HttpTimeouts::default(),
                    TokenBucket::new("gift_market", GIFT_MARKET_RATE, Duration::from_secs(1)),
                )?;
                pipeline = pipeline.with_gift_indexing(SessionLockManager::default(), Box::new(client));
            }
            None => log::warn!("GIFT_MARKET_URL not set, gift indexing disabled"),
        }

        match &config.sticker_market_url {
            Some(url) => {
                let client = StickerMarketClient::new(
                    url,
                    &HttpTimeouts::default(),
                    TokenBucket::new("sticker_market", STICKER_MARKET_RATE, Duration::from_secs(1)),
                )?;
                pipeline = pipeline.with_sticker_indexing(Arc::new(client));
            }
            None => log::warn!("STICKER_MARKET_URL not set, sticker indexing disabled"),
        }

        Ok(Self {
            db,
            rules,
            holdings,
            store,
            aggregator,
            pipeline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::memory_store::MemoryCoordinationStore;
    use serial_test::serial;
    use teloxide::types::{ChatId, UserId};
    use tempfile::TempDir;

    #[tokio::test]
    #[serial]
    async fn test_build_wires_storage_and_pipeline() {
        let temp = TempDir::new().unwrap();
        let categories_path = temp.path().join("categories.ron");
        std::fs::write(
            &categories_path,
            r#"(usernames: "EQU", anonymous_numbers: "EQN", ton_dns: "EQD", fixed: {})"#,
        )
        .unwrap();

        for var in [
            "GIFT_MARKET_URL",
            "STICKER_MARKET_URL",
            "SYNC_BATCH_SIZE",
            "SYNC_CONCURRENCY",
        ] {
            std::env::remove_var(var);
        }
        let mut config = GatekeeperConfig::from_env().unwrap();
        config.category_config_path = categories_path.to_string_lossy().to_string();

        let db = sled::open(temp.path().join("db")).unwrap();
        let deps =
            GatekeeperDependencies::build(&config, db, Arc::new(MemoryCoordinationStore::new()))
                .unwrap();

        deps.holdings.link_wallet(UserId(1), "EQA").unwrap();
        assert_eq!(deps.pipeline.bootstrap().await.unwrap(), 1);

        let summary = deps.aggregator.aggregate(ChatId(-1), UserId(1)).unwrap();
        assert_eq!(summary.wallet.as_deref(), Some("EQA"));
        assert_eq!(summary.items().count(), 0);
        assert!(!deps.pipeline.sticker_indexing_enabled());
    }

    #[tokio::test]
    #[serial]
    async fn test_sticker_market_url_enables_sticker_indexing() {
        let temp = TempDir::new().unwrap();
        let categories_path = temp.path().join("categories.ron");
        std::fs::write(
            &categories_path,
            r#"(usernames: "EQU", anonymous_numbers: "EQN", ton_dns: "EQD", fixed: {})"#,
        )
        .unwrap();

        std::env::remove_var("GIFT_MARKET_URL");
        let mut config = GatekeeperConfig::from_env().unwrap();
        config.category_config_path = categories_path.to_string_lossy().to_string();
        config.sticker_market_url = Some("https://stickers.example".to_string());

        let db = sled::open(temp.path().join("db")).unwrap();
        let deps =
            GatekeeperDependencies::build(&config, db, Arc::new(MemoryCoordinationStore::new()))
                .unwrap();

        assert!(deps.pipeline.sticker_indexing_enabled());
    }
}
