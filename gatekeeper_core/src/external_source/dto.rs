use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;
use teloxide::types::{ChatId, UserId};

/// The only body an allow-list source may return.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalSourcePayload {
    pub users: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub total_timeout: Duration,
    pub max_redirects: usize,
    pub https_only: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            total_timeout: Duration::from_secs(30),
            max_redirects: 10,
            https_only: true,
        }
    }
}

/// A user dropped from a chat's external source list. Travels through the
/// revocation mailbox as `chat_id:user_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MembershipRevocation {
    pub chat_id: ChatId,
    pub user_id: UserId,
}

impl MembershipRevocation {
    pub fn to_member(&self) -> String {
        format!("{}:{}", self.chat_id.0, self.user_id.0)
    }

    pub fn parse(member: &str) -> Option<Self> {
        let (chat_id, user_id) = member.split_once(':')?;

        Some(Self {
            chat_id: ChatId(chat_id.parse().ok()?),
            user_id: UserId(user_id.parse().ok()?),
        })
    }
}

/// Membership delta between two snapshots of a list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhitelistDiff {
    pub added: BTreeSet<u64>,
    pub removed: BTreeSet<u64>,
}

impl WhitelistDiff {
    /// Without a previous snapshot everything is added and nothing removed.
    pub fn compute(previous: Option<&[u64]>, current: &[u64]) -> Self {
        let current: BTreeSet<u64> = current.iter().copied().collect();

        match previous {
            Some(previous) => {
                let previous: BTreeSet<u64> = previous.iter().copied().collect();
                Self {
                    added: current.difference(&previous).copied().collect(),
                    removed: previous.difference(&current).copied().collect(),
                }
            }
            None => Self {
                added: current,
                removed: BTreeSet::new(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
