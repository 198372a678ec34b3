use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::coordination::handler::{
    mailbox_key, queue_key, revoked_key, tracked_key, CoordinationStore, Mailbox,
};
use crate::error::GateResult;

/// In-process store with the same semantics as the Redis one. Used for local
/// runs without Redis and in tests.
#[derive(Clone, Default)]
pub struct MemoryCoordinationStore {
    markers: Arc<DashMap<String, Instant>>,
    queues: Arc<DashMap<String, VecDeque<String>>>,
    sets: Arc<DashMap<String, HashSet<String>>>,
}

impl MemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.queues
            .get(&queue_key(queue))
            .map(|queue| queue.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    async fn mark_tracked(&self, entity: &str, ttl: Duration) -> GateResult<bool> {
        let now = Instant::now();

        match self.markers.entry(tracked_key(entity)) {
            Entry::Occupied(mut marker) if *marker.get() <= now => {
                marker.insert(now + ttl);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(marker) => {
                marker.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn clear_tracked(&self, entity: &str) -> GateResult<()> {
        self.markers.remove(&tracked_key(entity));
        Ok(())
    }

    async fn enqueue(&self, queue: &str, payload: String) -> GateResult<()> {
        self.queues
            .entry(queue_key(queue))
            .or_default()
            .push_front(payload);
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> GateResult<Option<String>> {
        Ok(self
            .queues
            .get_mut(&queue_key(queue))
            .and_then(|mut queue| queue.pop_back()))
    }

    async fn push_to_mailbox(&self, mailbox: Mailbox, members: &[String]) -> GateResult<()> {
        if members.is_empty() {
            return Ok(());
        }

        self.sets
            .entry(mailbox_key(mailbox))
            .or_default()
            .extend(members.iter().cloned());
        Ok(())
    }

    async fn drain_mailbox(&self, mailbox: Mailbox) -> GateResult<Vec<String>> {
        Ok(self
            .sets
            .remove(&mailbox_key(mailbox))
            .map(|(_, members)| members.into_iter().collect())
            .unwrap_or_default())
    }

    async fn revoke_job(&self, job_id: &str) -> GateResult<()> {
        self.sets
            .entry(revoked_key())
            .or_default()
            .insert(job_id.to_string());
        Ok(())
    }

    async fn take_revocation(&self, job_id: &str) -> GateResult<bool> {
        Ok(self
            .sets
            .get_mut(&revoked_key())
            .map(|mut revoked| revoked.remove(job_id))
            .unwrap_or(false))
    }
}
