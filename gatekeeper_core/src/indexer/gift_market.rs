use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use teloxide::types::UserId;

use crate::error::{GateError, GateResult};
use crate::holdings::dto::{GiftCollectionMetadata, GiftItem};
use crate::indexer::dto::{GiftMarketCollections, GiftMarketPage, HttpTimeouts};
use crate::indexer::handler::GiftMarket;
use crate::rate_limit::TokenBucket;
use crate::session_lock::handler::SessionClient;

const PAGE_SIZE: u64 = 500;

/// Gift ownership from the marketplace API. The access token lives in the
/// session file and is only held in memory between `start` and `stop`.
pub struct GiftMarketClient {
    client: Client,
    base_url: String,
    session_path: PathBuf,
    token: Option<String>,
    limiter: TokenBucket,
}

impl GiftMarketClient {
    pub fn new(
        base_url: &str,
        session_path: PathBuf,
        timeouts: &HttpTimeouts,
        limiter: TokenBucket,
    ) -> GateResult<Self> {
        let client = timeouts
            .apply(Client::builder().user_agent("gatekeeper-gifts/1.0"))
            .build()
            .map_err(|e| GateError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_path,
            token: None,
            limiter,
        })
    }

    pub fn is_started(&self) -> bool {
        self.token.is_some()
    }
}

#[async_trait]
impl SessionClient for GiftMarketClient {
    fn session_path(&self) -> &Path {
        &self.session_path
    }

    async fn start(&mut self) -> GateResult<()> {
        let content = tokio::fs::read_to_string(&self.session_path).await?;
        let token = content.trim();

        if token.is_empty() {
            return Err(GateError::Config(format!(
                "Session file {} holds no token",
                self.session_path.display()
            )));
        }

        self.token = Some(token.to_string());
        log::info!("Gift market session started from {}", self.session_path.display());
        Ok(())
    }

    async fn stop(&mut self) -> GateResult<()> {
        self.token = None;
        Ok(())
    }
}

impl GiftMarketClient {
    fn token(&self) -> GateResult<&str> {
        self.token.as_deref().ok_or_else(|| {
            GateError::Validation("Gift market session is not started".to_string())
        })
    }
}

#[async_trait]
impl GiftMarket for GiftMarketClient {
    async fn list_collections(&self) -> GateResult<Vec<GiftCollectionMetadata>> {
        let token = self.token()?;
        self.limiter.acquire().await;

        let response = self
            .client
            .get(format!("{}/collections", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| GateError::Transport(format!("Gift market request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GateError::Transport(format!(
                "Gift market answered {} for the collection list",
                status
            )));
        }

        let listing: GiftMarketCollections = response.json().await.map_err(|e| {
            GateError::Validation(format!("Unexpected gift market body: {}", e))
        })?;

        Ok(listing
            .collections
            .into_iter()
            .map(|collection| GiftCollectionMetadata {
                title: collection.title.unwrap_or_else(|| collection.slug.clone()),
                collection_slug: collection.slug,
            })
            .collect())
    }

    async fn fetch_gift_collection(&self, collection_slug: &str) -> GateResult<Vec<GiftItem>> {
        let token = self.token()?;

        let url = format!("{}/collections/{}/gifts", self.base_url, collection_slug);
        let mut offset = 0u64;
        let mut gifts = Vec::new();

        loop {
            self.limiter.acquire().await;

            let response = self
                .client
                .get(&url)
                .bearer_auth(token)
                .query(&[("offset", offset), ("limit", PAGE_SIZE)])
                .send()
                .await
                .map_err(|e| GateError::Transport(format!("Gift market request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(GateError::Transport(format!(
                    "Gift market answered {} for {}",
                    status, collection_slug
                )));
            }

            let page: GiftMarketPage = response.json().await.map_err(|e| {
                GateError::Validation(format!("Unexpected gift market body: {}", e))
            })?;

            gifts.extend(page.gifts.into_iter().map(|gift| GiftItem {
                collection_slug: collection_slug.to_string(),
                number: gift.number,
                owner_user_id: gift.owner_user_id.map(UserId),
                model: gift.model,
                backdrop: gift.backdrop,
                pattern: gift.pattern,
            }));

            match page.next_offset {
                Some(next) if next > offset => offset = next,
                _ => break,
            }
        }

        log::info!("Fetched {} gifts of {}", gifts.len(), collection_slug);
        Ok(gifts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, temp: &TempDir, token: &str) -> GiftMarketClient {
        let session_path = temp.path().join("gifts.session");
        std::fs::write(&session_path, token).unwrap();
        let limiter = TokenBucket::new("gifts", 100, Duration::from_secs(1));
        let timeouts = HttpTimeouts {
            connect: Duration::from_secs(1),
            read: Duration::from_millis(500),
            total: Duration::from_millis(500),
        };
        GiftMarketClient::new(&server.uri(), session_path, &timeouts, limiter).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_requires_started_session() {
        let server = MockServer::start().await;
        let temp = TempDir::new().unwrap();
        let client = client(&server, &temp, "token");

        let result = client.fetch_gift_collection("plushpepe").await;
        assert!(matches!(result, Err(GateError::Validation(_))));
    }

    #[tokio::test]
    async fn test_empty_session_file_fails_start() {
        let server = MockServer::start().await;
        let temp = TempDir::new().unwrap();
        let mut client = client(&server, &temp, "  \n");

        assert!(matches!(client.start().await, Err(GateError::Config(_))));
        assert!(!client.is_started());
    }

    #[tokio::test]
    async fn test_fetch_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/plushpepe/gifts"))
            .and(header("authorization", "Bearer token"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"gifts":[{"number":1,"owner_user_id":42,"model":"Gold","backdrop":"Black"}],"next_offset":1}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/collections/plushpepe/gifts"))
            .and(query_param("offset", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"gifts":[{"number":2,"owner_user_id":null}]}"#,
            ))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let mut client = client(&server, &temp, "token\n");
        client.start().await.unwrap();

        let gifts = client.fetch_gift_collection("plushpepe").await.unwrap();
        assert_eq!(gifts.len(), 2);
        assert_eq!(gifts[0].owner_user_id, Some(UserId(42)));
        assert_eq!(gifts[0].model.as_deref(), Some("Gold"));
        assert_eq!(gifts[1].owner_user_id, None);
        assert_eq!(gifts[1].collection_slug, "plushpepe");

        client.stop().await.unwrap();
        assert!(!client.is_started());
    }

    #[tokio::test]
    async fn test_collection_list_falls_back_to_slug_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"collections":[{"slug":"plushpepe","title":"Plush Pepe"},{"slug":"durovcap"}]}"#,
            ))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let mut client = client(&server, &temp, "token");
        client.start().await.unwrap();

        let collections = client.list_collections().await.unwrap();
        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0].title, "Plush Pepe");
        assert_eq!(collections[1].collection_slug, "durovcap");
        assert_eq!(collections[1].title, "durovcap");
    }

    #[tokio::test]
    async fn test_hung_market_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"gifts":[]}"#)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let mut client = client(&server, &temp, "token");
        client.start().await.unwrap();

        let result = client.fetch_gift_collection("plushpepe").await;
        assert!(matches!(result, Err(GateError::Transport(_))));
    }
}
