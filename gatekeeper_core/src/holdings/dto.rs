use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use teloxide::types::UserId;

pub const NANOTONS_PER_TON: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NftItem {
    pub address: String,
    pub collection_address: Option<String>,
    pub name: Option<String>,
}

/// Everything known about one wallet at `observed_at` (unix seconds).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletSnapshot {
    pub address: String,
    pub ton_balance: u128,
    pub jettons: BTreeMap<String, u128>,
    pub nft_items: Vec<NftItem>,
    pub observed_at: i64,
}

impl WalletSnapshot {
    pub fn ton(&self) -> f64 {
        self.ton_balance as f64 / NANOTONS_PER_TON
    }

    pub fn jetton_raw_balance(&self, jetton_address: &str) -> u128 {
        self.jettons.get(jetton_address).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelegramProfile {
    pub user_id: UserId,
    pub is_premium: bool,
    pub emoji_status_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StickerItem {
    pub collection_id: u64,
    pub character_id: u64,
    pub category: Option<String>,
    pub owner_user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GiftItem {
    pub collection_slug: String,
    pub number: u64,
    pub owner_user_id: Option<UserId>,
    pub model: Option<String>,
    pub backdrop: Option<String>,
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JettonMetadata {
    pub address: String,
    pub symbol: String,
    pub decimals: u32,
}

impl JettonMetadata {
    pub fn to_amount(&self, raw: u128) -> f64 {
        raw as f64 / 10_f64.powi(self.decimals as i32)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NftCollectionMetadata {
    pub address: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StickerCollectionMetadata {
    pub collection_id: u64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GiftCollectionMetadata {
    pub collection_slug: String,
    pub title: String,
}
