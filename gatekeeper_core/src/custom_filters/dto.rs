use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::str::FromStr;

use crate::error::{GateError, GateResult};

/// Named sub-categories of NFT ownership a rule can ask for instead of a
/// literal collection address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NftCategory {
    Usernames4,
    Usernames5,
    AnonymousNumbers7,
    TonDns4,
    TonDns5,
    PlushPepes,
}

impl fmt::Display for NftCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NftCategory::Usernames4 => write!(f, "usernames-4"),
            NftCategory::Usernames5 => write!(f, "usernames-5"),
            NftCategory::AnonymousNumbers7 => write!(f, "anonymous-numbers-7"),
            NftCategory::TonDns4 => write!(f, "ton-dns-4"),
            NftCategory::TonDns5 => write!(f, "ton-dns-5"),
            NftCategory::PlushPepes => write!(f, "plush-pepes"),
        }
    }
}

impl FromStr for NftCategory {
    type Err = GateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "usernames-4" => Ok(NftCategory::Usernames4),
            "usernames-5" => Ok(NftCategory::Usernames5),
            "anonymous-numbers-7" => Ok(NftCategory::AnonymousNumbers7),
            "ton-dns-4" => Ok(NftCategory::TonDns4),
            "ton-dns-5" => Ok(NftCategory::TonDns5),
            "plush-pepes" => Ok(NftCategory::PlushPepes),
            other => Err(GateError::UnknownCategory(other.to_string())),
        }
    }
}

/// Collection addresses the category filters match against. Loaded from a
/// RON file so addresses can change without a rebuild.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryAddresses {
    pub usernames: String,
    pub anonymous_numbers: String,
    pub ton_dns: String,
    pub fixed: HashMap<NftCategory, String>,
}

impl CategoryAddresses {
    pub fn from_file(path: &str) -> GateResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            GateError::Config(format!("Failed to read category table {}: {}", path, e))
        })?;

        Self::from_ron(&content)
    }

    pub fn from_ron(content: &str) -> GateResult<Self> {
        ron::from_str(content)
            .map_err(|e| GateError::Config(format!("Failed to parse category table: {}", e)))
    }

    pub fn fixed_collection(&self, category: NftCategory) -> Option<&str> {
        self.fixed.get(&category).map(String::as_str)
    }
}
