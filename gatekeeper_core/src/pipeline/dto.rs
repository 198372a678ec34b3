use std::time::Duration;

use crate::external_source::dto::MembershipRevocation;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Wallets fetched and written per storage transaction.
    pub batch_size: usize,
    /// Concurrent indexer requests within a batch.
    pub concurrency: usize,
    pub tracking_ttl: Duration,
    pub queue: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            concurrency: 16,
            tracking_ttl: Duration::from_secs(10 * 365 * 24 * 60 * 60),
            queue: "refresh".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Addresses taken from the `updated` mailbox.
    pub drained: usize,
    pub written: usize,
    /// Addresses whose fetch failed and went back to `updated`.
    pub requeued: usize,
    pub disconnected: usize,
    /// Drained from `membership_revoked`, for the chat layer to act on.
    pub revocations: Vec<MembershipRevocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Revoked before it ran.
    Revoked,
    /// The job's target no longer exists or is disabled.
    Skipped,
}
