use async_trait::async_trait;

use teloxide::types::UserId;

use crate::error::GateResult;
use crate::holdings::dto::{GiftCollectionMetadata, GiftItem};
use crate::indexer::dto::{IndexedStickers, IndexedWallet};
use crate::session_lock::handler::SessionClient;

/// Source of on-chain wallet state.
#[async_trait]
pub trait HoldingsIndexer: Send + Sync {
    async fn fetch_wallet(&self, address: &str) -> GateResult<IndexedWallet>;
}

/// Source of a user's sticker holdings.
#[async_trait]
pub trait StickerIndexer: Send + Sync {
    async fn fetch_stickers(&self, user_id: UserId) -> GateResult<IndexedStickers>;
}

/// Session-bound client for the gift marketplace. Must be started before use.
#[async_trait]
pub trait GiftMarket: SessionClient {
    /// Every collection the market lists.
    async fn list_collections(&self) -> GateResult<Vec<GiftCollectionMetadata>>;

    async fn fetch_gift_collection(&self, collection_slug: &str) -> GateResult<Vec<GiftItem>>;
}
