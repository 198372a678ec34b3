use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{GateError, GateResult};
use crate::holdings::dto::{JettonMetadata, NftCollectionMetadata, NftItem, WalletSnapshot};
use crate::indexer::dto::{
    IndexedWallet, TonApiAccount, TonApiConfig, TonApiJettonBalances, TonApiNftItems,
};
use crate::indexer::handler::HoldingsIndexer;
use crate::rate_limit::TokenBucket;

/// Wallet state from the TonAPI v2 REST endpoints.
#[derive(Clone)]
pub struct TonApiIndexer {
    client: Client,
    config: TonApiConfig,
    limiter: TokenBucket,
}

impl TonApiIndexer {
    pub fn new(config: TonApiConfig, limiter: TokenBucket) -> GateResult<Self> {
        let client = config
            .timeouts
            .apply(Client::builder().user_agent("gatekeeper-indexer/1.0"))
            .build()
            .map_err(|e| GateError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> GateResult<T> {
        self.limiter.acquire().await;

        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut request = self.client.get(&url).query(query);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GateError::Transport(format!("TonAPI request {} failed: {}", url, e)))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(GateError::NotFound(format!("TonAPI has no data for {}", path)));
            }
            status => {
                return Err(GateError::Transport(format!(
                    "TonAPI answered {} for {}",
                    status, path
                )));
            }
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                GateError::Transport(format!("TonAPI body for {} timed out: {}", path, e))
            } else {
                GateError::Validation(format!("Unexpected TonAPI body for {}: {}", path, e))
            }
        })
    }

    /// Pages through the account's nfts. Collection names seen on the way are
    /// returned next to the items.
    async fn fetch_nft_items(
        &self,
        address: &str,
    ) -> GateResult<(Vec<NftItem>, Vec<NftCollectionMetadata>)> {
        let page_size = self.config.nft_page_size.max(1);
        let mut offset = 0u32;
        let mut items = Vec::new();
        let mut collections = BTreeMap::new();

        loop {
            let page: TonApiNftItems = self
                .get_json(
                    &format!("/v2/accounts/{}/nfts", address),
                    &[
                        ("limit", page_size.to_string()),
                        ("offset", offset.to_string()),
                    ],
                )
                .await?;

            let fetched = page.nft_items.len() as u32;
            for item in page.nft_items {
                if let Some(collection) = &item.collection {
                    collections
                        .entry(collection.address.clone())
                        .or_insert_with(|| NftCollectionMetadata {
                            address: collection.address.clone(),
                            name: collection.name.clone().unwrap_or_default(),
                        });
                }

                items.push(NftItem {
                    address: item.address,
                    collection_address: item.collection.map(|collection| collection.address),
                    name: item.metadata.and_then(|metadata| metadata.name).or(item.dns),
                });
            }

            if fetched < page_size {
                break;
            }
            offset += page_size;
        }

        Ok((items, collections.into_values().collect()))
    }
}

#[async_trait]
impl HoldingsIndexer for TonApiIndexer {
    async fn fetch_wallet(&self, address: &str) -> GateResult<IndexedWallet> {
        let account: TonApiAccount = self
            .get_json(&format!("/v2/accounts/{}", address), &[])
            .await?;

        let jetton_balances: TonApiJettonBalances = self
            .get_json(&format!("/v2/accounts/{}/jettons", address), &[])
            .await?;

        let mut jettons = BTreeMap::new();
        let mut jetton_metadata = Vec::new();
        for entry in jetton_balances.balances {
            let raw = entry.balance.parse::<u128>().map_err(|e| {
                GateError::Validation(format!(
                    "Invalid balance '{}' for jetton {}: {}",
                    entry.balance, entry.jetton.address, e
                ))
            })?;

            // Without decimals the balance cannot be scaled, so no metadata is recorded.
            if let Some(decimals) = entry.jetton.decimals {
                jetton_metadata.push(JettonMetadata {
                    address: entry.jetton.address.clone(),
                    symbol: entry.jetton.symbol.clone().unwrap_or_default(),
                    decimals,
                });
            }
            jettons.insert(entry.jetton.address, raw);
        }

        let (nft_items, collections) = self.fetch_nft_items(address).await?;

        log::debug!(
            "Fetched wallet {} ({} jettons, {} nfts)",
            account.address,
            jettons.len(),
            nft_items.len()
        );

        Ok(IndexedWallet {
            snapshot: WalletSnapshot {
                address: address.to_string(),
                ton_balance: account.balance as u128,
                jettons,
                nft_items,
                observed_at: Utc::now().timestamp(),
            },
            jettons: jetton_metadata,
            collections,
        })
    }
}
