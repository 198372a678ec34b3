use std::sync::Arc;
use std::time::Duration;

use gatekeeper_core::coordination::handler::CoordinationStore;
use gatekeeper_core::jobs::dto::JobEnvelope;
use gatekeeper_core::pipeline::dto::JobOutcome;
use gatekeeper_core::pipeline::handler::OwnershipSyncPipeline;

use crate::error::{ConsumerError, ConsumerResult};

const IDLE_WAIT: Duration = Duration::from_secs(5);

/// What one pass over the queue did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    Idle,
    Handled,
    /// The job failed with a retryable error and went back on the queue.
    Requeued,
}

impl Processed {
    /// How long the loop waits before the next pass.
    pub fn pause(self) -> Option<Duration> {
        match self {
            Processed::Handled => None,
            Processed::Idle | Processed::Requeued => Some(IDLE_WAIT),
        }
    }
}

/// Pulls refresh jobs off the queue one at a time.
pub struct Worker {
    consumer_id: String,
    store: Arc<dyn CoordinationStore>,
    pipeline: OwnershipSyncPipeline,
}

impl Worker {
    pub fn new(
        consumer_id: String,
        store: Arc<dyn CoordinationStore>,
        pipeline: OwnershipSyncPipeline,
    ) -> Self {
        Self {
            consumer_id,
            store,
            pipeline,
        }
    }

    pub async fn run(&self) -> ConsumerResult<()> {
        loop {
            match self.process_next().await {
                Ok(processed) => {
                    if let Some(pause) = processed.pause() {
                        tokio::time::sleep(pause).await;
                    }
                }
                Err(ConsumerError::InvalidMessage(msg)) => {
                    log::error!("[{}] Dropped invalid message: {}", self.consumer_id, msg);
                }
                Err(e) => {
                    log::error!(
                        "[{}] {}. Retrying in {} seconds...",
                        self.consumer_id,
                        e,
                        IDLE_WAIT.as_secs()
                    );
                    tokio::time::sleep(IDLE_WAIT).await;
                }
            }
        }
    }

    /// Handles at most one job. Jobs failing with a retryable error go back on
    /// the queue; others are dropped.
    pub async fn process_next(&self) -> ConsumerResult<Processed> {
        let queue = self.pipeline.queue();

        let Some(message) = self.store.dequeue(queue).await? else {
            return Ok(Processed::Idle);
        };

        let envelope = JobEnvelope::from_payload(&message)
            .map_err(|e| ConsumerError::InvalidMessage(e.to_string()))?;

        match self.pipeline.handle_job(&envelope).await {
            Ok(JobOutcome::Completed) => {
                log::info!("[{}] Finished {} ({})", self.consumer_id, envelope.job, envelope.id);
            }
            Ok(outcome) => {
                log::info!(
                    "[{}] {} ({}) not run: {:?}",
                    self.consumer_id,
                    envelope.job,
                    envelope.id,
                    outcome
                );
            }
            Err(e) if e.is_retryable() => {
                log::error!(
                    "[{}] Error running {} ({}): {}. Requeueing",
                    self.consumer_id,
                    envelope.job,
                    envelope.id,
                    e
                );
                self.store.enqueue(queue, message).await?;
                return Ok(Processed::Requeued);
            }
            Err(e) => {
                log::error!(
                    "[{}] Dropping {} ({}): {}",
                    self.consumer_id,
                    envelope.job,
                    envelope.id,
                    e
                );
            }
        }

        Ok(Processed::Handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gatekeeper_core::coordination::memory_store::MemoryCoordinationStore;
    use gatekeeper_core::error::{GateError, GateResult};
    use gatekeeper_core::external_source::dto::FetcherConfig;
    use gatekeeper_core::external_source::handler::ExternalSourceFetcher;
    use gatekeeper_core::holdings::dto::WalletSnapshot;
    use gatekeeper_core::holdings::storage::HoldingsStorage;
    use gatekeeper_core::indexer::dto::IndexedWallet;
    use gatekeeper_core::indexer::handler::HoldingsIndexer;
    use gatekeeper_core::jobs::dto::RefreshJob;
    use gatekeeper_core::pipeline::dto::SyncConfig;
    use gatekeeper_core::rate_limit::TokenBucket;
    use gatekeeper_core::rules::storage::RuleStorage;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct FlakyIndexer;

    #[async_trait]
    impl HoldingsIndexer for FlakyIndexer {
        async fn fetch_wallet(&self, address: &str) -> GateResult<IndexedWallet> {
            if address == "EQDown" {
                return Err(GateError::Transport("connection reset".to_string()));
            }

            Ok(WalletSnapshot {
                address: address.to_string(),
                ton_balance: 1,
                jettons: BTreeMap::new(),
                nft_items: vec![],
                observed_at: 1,
            }
            .into())
        }
    }

    fn worker(temp: &TempDir) -> (Worker, MemoryCoordinationStore, HoldingsStorage) {
        let db = sled::open(temp.path()).unwrap();
        let holdings = HoldingsStorage::new(&db).unwrap();
        let rules = RuleStorage::new(db).unwrap();
        let store = MemoryCoordinationStore::new();
        let fetcher = ExternalSourceFetcher::new(
            &FetcherConfig::default(),
            TokenBucket::new("external", 10, Duration::from_secs(1)),
        )
        .unwrap();

        let pipeline = OwnershipSyncPipeline::new(
            Arc::new(store.clone()),
            holdings.clone(),
            rules,
            Arc::new(FlakyIndexer),
            fetcher,
            SyncConfig::default(),
        );

        let worker = Worker::new("test".to_string(), Arc::new(store.clone()), pipeline);
        (worker, store, holdings)
    }

    #[tokio::test]
    async fn test_empty_queue_reports_idle() {
        let temp = TempDir::new().unwrap();
        let (worker, _, _) = worker(&temp);

        assert_eq!(worker.process_next().await.unwrap(), Processed::Idle);
    }

    #[tokio::test]
    async fn test_job_runs_and_leaves_queue() {
        let temp = TempDir::new().unwrap();
        let (worker, store, holdings) = worker(&temp);
        worker
            .pipeline
            .enqueue(RefreshJob::RefreshWallet {
                address: "EQA".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(worker.process_next().await.unwrap(), Processed::Handled);
        assert!(holdings.get_wallet("EQA").unwrap().is_some());
        assert_eq!(store.queue_len(worker.pipeline.queue()), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_is_requeued() {
        let temp = TempDir::new().unwrap();
        let (worker, store, _) = worker(&temp);
        worker
            .pipeline
            .enqueue(RefreshJob::RefreshWallet {
                address: "EQDown".to_string(),
            })
            .await
            .unwrap();

        let processed = worker.process_next().await.unwrap();

        assert_eq!(processed, Processed::Requeued);
        assert_eq!(processed.pause(), Some(IDLE_WAIT));
        assert_eq!(store.queue_len(worker.pipeline.queue()), 1);
    }

    #[test]
    fn test_only_handled_jobs_skip_the_pause() {
        assert_eq!(Processed::Handled.pause(), None);
        assert_eq!(Processed::Idle.pause(), Some(IDLE_WAIT));
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let temp = TempDir::new().unwrap();
        let (worker, store, _) = worker(&temp);
        store
            .enqueue(worker.pipeline.queue(), "not json".to_string())
            .await
            .unwrap();

        let result = worker.process_next().await;

        assert!(matches!(result, Err(ConsumerError::InvalidMessage(_))));
        assert_eq!(store.queue_len(worker.pipeline.queue()), 0);
    }
}
