use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use teloxide::types::UserId;

use crate::error::{GateError, GateResult};
use crate::holdings::dto::{StickerCollectionMetadata, StickerItem};
use crate::indexer::dto::{HttpTimeouts, IndexedStickers, StickerMarketItems};
use crate::indexer::handler::StickerIndexer;
use crate::rate_limit::TokenBucket;

/// Sticker ownership per Telegram user from the sticker marketplace API.
#[derive(Clone)]
pub struct StickerMarketClient {
    client: Client,
    base_url: String,
    limiter: TokenBucket,
}

impl StickerMarketClient {
    pub fn new(base_url: &str, timeouts: &HttpTimeouts, limiter: TokenBucket) -> GateResult<Self> {
        let client = timeouts
            .apply(Client::builder().user_agent("gatekeeper-stickers/1.0"))
            .build()
            .map_err(|e| GateError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
        })
    }
}

#[async_trait]
impl StickerIndexer for StickerMarketClient {
    async fn fetch_stickers(&self, user_id: UserId) -> GateResult<IndexedStickers> {
        self.limiter.acquire().await;

        let url = format!("{}/users/{}/stickers", self.base_url, user_id.0);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GateError::Transport(format!("Sticker market request failed: {}", e)))?;

        match response.status() {
            status if status.is_success() => {}
            // Users the market never saw simply own nothing.
            StatusCode::NOT_FOUND => return Ok(IndexedStickers::default()),
            status => {
                return Err(GateError::Transport(format!(
                    "Sticker market answered {} for user {}",
                    status, user_id.0
                )));
            }
        }

        let listing: StickerMarketItems = response.json().await.map_err(|e| {
            GateError::Validation(format!("Unexpected sticker market body: {}", e))
        })?;

        let mut collections = BTreeMap::new();
        let mut items = Vec::with_capacity(listing.items.len());

        for item in listing.items {
            if let Some(title) = item.collection_title {
                collections
                    .entry(item.collection_id)
                    .or_insert(StickerCollectionMetadata {
                        collection_id: item.collection_id,
                        title,
                    });
            }

            items.push(StickerItem {
                collection_id: item.collection_id,
                character_id: item.character_id,
                category: item.category,
                owner_user_id: user_id,
            });
        }

        log::debug!("Fetched {} stickers of user {}", items.len(), user_id.0);

        Ok(IndexedStickers {
            items,
            collections: collections.into_values().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> StickerMarketClient {
        let limiter = TokenBucket::new("stickers", 100, Duration::from_secs(1));
        let timeouts = HttpTimeouts {
            connect: Duration::from_secs(1),
            read: Duration::from_millis(500),
            total: Duration::from_millis(500),
        };
        StickerMarketClient::new(&server.uri(), &timeouts, limiter).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_stickers_collects_titles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/42/stickers"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"items":[
                    {"collection_id":7,"collection_title":"Dogs","character_id":1,"category":"gold"},
                    {"collection_id":7,"collection_title":"Dogs","character_id":2},
                    {"collection_id":9,"character_id":3}
                ]}"#,
            ))
            .mount(&server)
            .await;

        let stickers = client(&server).fetch_stickers(UserId(42)).await.unwrap();

        assert_eq!(stickers.items.len(), 3);
        assert_eq!(stickers.items[0].category.as_deref(), Some("gold"));
        assert!(stickers.items.iter().all(|item| item.owner_user_id == UserId(42)));
        assert_eq!(
            stickers.collections,
            vec![StickerCollectionMetadata {
                collection_id: 7,
                title: "Dogs".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_user_owns_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let stickers = client(&server).fetch_stickers(UserId(1)).await.unwrap();
        assert!(stickers.items.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = client(&server).fetch_stickers(UserId(1)).await;
        assert!(matches!(result, Err(GateError::Transport(_))));
    }
}
