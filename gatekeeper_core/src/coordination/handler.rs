use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::GateResult;

/// Named append-only sets other producers write into and the pipeline drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mailbox {
    Updated,
    Disconnected,
    MembershipRevoked,
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mailbox::Updated => write!(f, "updated"),
            Mailbox::Disconnected => write!(f, "disconnected"),
            Mailbox::MembershipRevoked => write!(f, "membership_revoked"),
        }
    }
}

/// Shared state between scheduler, workers and producers. Nothing outside
/// this interface touches the underlying keys.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Sets the tracking marker for `entity` unless present. True when newly set.
    async fn mark_tracked(&self, entity: &str, ttl: Duration) -> GateResult<bool>;

    async fn clear_tracked(&self, entity: &str) -> GateResult<()>;

    async fn enqueue(&self, queue: &str, payload: String) -> GateResult<()>;

    async fn dequeue(&self, queue: &str) -> GateResult<Option<String>>;

    async fn push_to_mailbox(&self, mailbox: Mailbox, members: &[String]) -> GateResult<()>;

    /// Removes and returns every member in one atomic step.
    async fn drain_mailbox(&self, mailbox: Mailbox) -> GateResult<Vec<String>>;

    async fn revoke_job(&self, job_id: &str) -> GateResult<()>;

    /// Consumes a revocation. True when the job had been revoked.
    async fn take_revocation(&self, job_id: &str) -> GateResult<bool>;
}

pub(crate) const KEY_PREFIX: &str = "gatekeeper";

pub(crate) fn tracked_key(entity: &str) -> String {
    format!("{}:tracked:{}", KEY_PREFIX, entity)
}

pub(crate) fn queue_key(queue: &str) -> String {
    format!("{}:queue:{}", KEY_PREFIX, queue)
}

pub(crate) fn mailbox_key(mailbox: Mailbox) -> String {
    format!("{}:mailbox:{}", KEY_PREFIX, mailbox)
}

pub(crate) fn revoked_key() -> String {
    format!("{}:revoked_jobs", KEY_PREFIX)
}
