use std::time::Duration;

use reqwest::ClientBuilder;
use serde::Deserialize;

use crate::holdings::dto::{
    JettonMetadata, NftCollectionMetadata, StickerCollectionMetadata, StickerItem, WalletSnapshot,
};

/// A wallet snapshot plus the asset metadata seen while fetching it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedWallet {
    pub snapshot: WalletSnapshot,
    pub jettons: Vec<JettonMetadata>,
    pub collections: Vec<NftCollectionMetadata>,
}

impl From<WalletSnapshot> for IndexedWallet {
    fn from(snapshot: WalletSnapshot) -> Self {
        Self {
            snapshot,
            jettons: vec![],
            collections: vec![],
        }
    }
}

/// A user's full sticker list and the collections it refers to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedStickers {
    pub items: Vec<StickerItem>,
    pub collections: Vec<StickerCollectionMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct TonApiAccount {
    pub address: String,
    pub balance: u64,
}

#[derive(Debug, Deserialize)]
pub struct TonApiJettonBalances {
    #[serde(default)]
    pub balances: Vec<TonApiJettonBalance>,
}

#[derive(Debug, Deserialize)]
pub struct TonApiJettonBalance {
    /// Raw amount as a decimal string.
    pub balance: String,
    pub jetton: TonApiJetton,
}

#[derive(Debug, Deserialize)]
pub struct TonApiJetton {
    pub address: String,
    pub symbol: Option<String>,
    pub decimals: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct TonApiNftItems {
    #[serde(default)]
    pub nft_items: Vec<TonApiNftItem>,
}

#[derive(Debug, Deserialize)]
pub struct TonApiNftItem {
    pub address: String,
    pub collection: Option<TonApiNftCollection>,
    #[serde(default)]
    pub metadata: Option<TonApiNftMetadata>,
    pub dns: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TonApiNftCollection {
    pub address: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TonApiNftMetadata {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StickerMarketItems {
    #[serde(default)]
    pub items: Vec<StickerMarketItem>,
}

#[derive(Debug, Deserialize)]
pub struct StickerMarketItem {
    pub collection_id: u64,
    pub collection_title: Option<String>,
    pub character_id: u64,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GiftMarketPage {
    #[serde(default)]
    pub gifts: Vec<GiftMarketItem>,
    pub next_offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct GiftMarketCollections {
    #[serde(default)]
    pub collections: Vec<GiftMarketCollection>,
}

#[derive(Debug, Deserialize)]
pub struct GiftMarketCollection {
    pub slug: String,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GiftMarketItem {
    pub number: u64,
    pub owner_user_id: Option<u64>,
    pub model: Option<String>,
    pub backdrop: Option<String>,
    pub pattern: Option<String>,
}

/// Upper bounds for one upstream request.
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub total: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(30),
            total: Duration::from_secs(30),
        }
    }
}

impl HttpTimeouts {
    pub fn apply(&self, builder: ClientBuilder) -> ClientBuilder {
        builder
            .connect_timeout(self.connect)
            .read_timeout(self.read)
            .timeout(self.total)
    }
}

#[derive(Debug, Clone)]
pub struct TonApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Page size for the nfts endpoint.
    pub nft_page_size: u32,
    pub timeouts: HttpTimeouts,
}

impl Default for TonApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://tonapi.io".to_string(),
            api_key: None,
            nft_page_size: 1000,
            timeouts: HttpTimeouts::default(),
        }
    }
}
