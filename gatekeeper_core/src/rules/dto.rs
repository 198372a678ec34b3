use serde::{Deserialize, Serialize};
use std::fmt;
use teloxide::types::ChatId;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EligibilityRule {
    pub id: u64,
    pub chat_id: ChatId,
    pub group_id: Option<u64>,
    pub is_enabled: bool,
    pub kind: RuleKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    Jetton {
        address: String,
        threshold: f64,
    },
    Toncoin {
        threshold: f64,
    },
    NftCollection {
        address: Option<String>,
        category: Option<String>,
        threshold: u64,
    },
    Premium,
    StickerCollection {
        collection_id: u64,
        character_id: Option<u64>,
        category: Option<String>,
        threshold: u64,
    },
    Emoji {
        emoji_id: String,
    },
    GiftCollection {
        collection_slug: String,
        model: Option<String>,
        backdrop: Option<String>,
        pattern: Option<String>,
        threshold: u64,
    },
    Whitelist {
        user_ids: Vec<u64>,
    },
    ExternalSource {
        url: String,
        auth_key: Option<String>,
        auth_value: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Jetton,
    Toncoin,
    NftCollection,
    Premium,
    StickerCollection,
    Emoji,
    GiftCollection,
    Whitelist,
    ExternalSource,
}

impl RuleKind {
    pub fn rule_type(&self) -> RuleType {
        match self {
            RuleKind::Jetton { .. } => RuleType::Jetton,
            RuleKind::Toncoin { .. } => RuleType::Toncoin,
            RuleKind::NftCollection { .. } => RuleType::NftCollection,
            RuleKind::Premium => RuleType::Premium,
            RuleKind::StickerCollection { .. } => RuleType::StickerCollection,
            RuleKind::Emoji { .. } => RuleType::Emoji,
            RuleKind::GiftCollection { .. } => RuleType::GiftCollection,
            RuleKind::Whitelist { .. } => RuleType::Whitelist,
            RuleKind::ExternalSource { .. } => RuleType::ExternalSource,
        }
    }

    /// Threshold of numeric rules, `None` for membership rules.
    pub fn threshold(&self) -> Option<f64> {
        match self {
            RuleKind::Jetton { threshold, .. } | RuleKind::Toncoin { threshold } => {
                Some(*threshold)
            }
            RuleKind::NftCollection { threshold, .. }
            | RuleKind::StickerCollection { threshold, .. }
            | RuleKind::GiftCollection { threshold, .. } => Some(*threshold as f64),
            RuleKind::Premium
            | RuleKind::Emoji { .. }
            | RuleKind::Whitelist { .. }
            | RuleKind::ExternalSource { .. } => None,
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleType::Jetton => write!(f, "jetton"),
            RuleType::Toncoin => write!(f, "toncoin"),
            RuleType::NftCollection => write!(f, "nft_collection"),
            RuleType::Premium => write!(f, "premium"),
            RuleType::StickerCollection => write!(f, "sticker_collection"),
            RuleType::Emoji => write!(f, "emoji"),
            RuleType::GiftCollection => write!(f, "gift_collection"),
            RuleType::Whitelist => write!(f, "whitelist"),
            RuleType::ExternalSource => write!(f, "external_source"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleGroup {
    pub id: u64,
    pub chat_id: ChatId,
    pub order: u32,
}

/// Rule payload accepted on creation, before an id is assigned.
#[derive(Debug, Clone)]
pub struct NewRule {
    pub chat_id: ChatId,
    pub group_id: Option<u64>,
    pub is_enabled: bool,
    pub kind: RuleKind,
}
