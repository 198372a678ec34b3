use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use teloxide::types::{ChatId, UserId};
use uuid::Uuid;

use crate::error::{GateError, GateResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefreshJob {
    RefreshWallet { address: String },
    RefreshExternalSource { chat_id: ChatId, rule_id: u64 },
    /// Re-index one gift collection, or every known one when `collection_slug` is empty.
    RefreshGifts { collection_slug: Option<String> },
    RefreshStickers { user_id: UserId },
}

impl fmt::Display for RefreshJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshJob::RefreshWallet { address } => write!(f, "refresh_wallet({})", address),
            RefreshJob::RefreshExternalSource { chat_id, rule_id } => {
                write!(f, "refresh_external_source({}:{})", chat_id.0, rule_id)
            }
            RefreshJob::RefreshGifts {
                collection_slug: Some(slug),
            } => write!(f, "refresh_gifts({})", slug),
            RefreshJob::RefreshGifts {
                collection_slug: None,
            } => write!(f, "refresh_gifts(all)"),
            RefreshJob::RefreshStickers { user_id } => write!(f, "refresh_stickers({})", user_id.0),
        }
    }
}

/// What actually travels through the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub job: RefreshJob,
    pub enqueued_at: i64,
}

impl JobEnvelope {
    pub fn new(job: RefreshJob) -> Self {
        Self {
            id: Uuid::new_v4(),
            job,
            enqueued_at: Utc::now().timestamp(),
        }
    }

    pub fn to_payload(&self) -> GateResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_payload(payload: &str) -> GateResult<Self> {
        serde_json::from_str(payload)
            .map_err(|e| GateError::Validation(format!("Malformed job payload: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_tagged_json() {
        let envelope = JobEnvelope::new(RefreshJob::RefreshExternalSource {
            chat_id: ChatId(-1001),
            rule_id: 4,
        });

        let payload = envelope.to_payload().unwrap();
        assert!(payload.contains(r#""type":"refresh_external_source""#));
        assert_eq!(JobEnvelope::from_payload(&payload).unwrap(), envelope);
    }

    #[test]
    fn test_garbage_payload_is_validation_error() {
        let result = JobEnvelope::from_payload(r#"{"id":"nope"}"#);
        assert!(matches!(result, Err(GateError::Validation(_))));
    }

    #[test]
    fn test_each_envelope_gets_fresh_id() {
        let job = RefreshJob::RefreshGifts {
            collection_slug: None,
        };
        assert_ne!(JobEnvelope::new(job.clone()).id, JobEnvelope::new(job).id);
    }
}
