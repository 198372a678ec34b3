use std::sync::Arc;

use futures::stream::{self, StreamExt};
use teloxide::types::UserId;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::coordination::handler::{CoordinationStore, Mailbox};
use crate::error::{GateError, GateResult};
use crate::external_source::dto::{MembershipRevocation, WhitelistDiff};
use crate::external_source::handler::ExternalSourceFetcher;
use crate::holdings::dto::TelegramProfile;
use crate::holdings::storage::HoldingsStorage;
use crate::indexer::dto::IndexedWallet;
use crate::indexer::handler::{GiftMarket, HoldingsIndexer, StickerIndexer};
use crate::jobs::dto::{JobEnvelope, RefreshJob};
use crate::pipeline::dto::{JobOutcome, ReconcileReport, SyncConfig};
use crate::rules::dto::{EligibilityRule, RuleKind};
use crate::rules::storage::RuleStorage;
use crate::session_lock::handler::SessionLockManager;

struct GiftIndexing {
    lock: SessionLockManager,
    client: Mutex<Box<dyn GiftMarket>>,
}

/// Keeps persisted holdings fresh. Work arrives through the coordination
/// store's mailboxes and queue; everything here is safe to run twice.
#[derive(Clone)]
pub struct OwnershipSyncPipeline {
    store: Arc<dyn CoordinationStore>,
    holdings: HoldingsStorage,
    rules: RuleStorage,
    indexer: Arc<dyn HoldingsIndexer>,
    fetcher: ExternalSourceFetcher,
    gifts: Option<Arc<GiftIndexing>>,
    stickers: Option<Arc<dyn StickerIndexer>>,
    config: SyncConfig,
}

impl OwnershipSyncPipeline {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        holdings: HoldingsStorage,
        rules: RuleStorage,
        indexer: Arc<dyn HoldingsIndexer>,
        fetcher: ExternalSourceFetcher,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            holdings,
            rules,
            indexer,
            fetcher,
            gifts: None,
            stickers: None,
            config,
        }
    }

    pub fn with_gift_indexing(mut self, lock: SessionLockManager, client: Box<dyn GiftMarket>) -> Self {
        self.gifts = Some(Arc::new(GiftIndexing {
            lock,
            client: Mutex::new(client),
        }));
        self
    }

    pub fn with_sticker_indexing(mut self, indexer: Arc<dyn StickerIndexer>) -> Self {
        self.stickers = Some(indexer);
        self
    }

    pub fn sticker_indexing_enabled(&self) -> bool {
        self.stickers.is_some()
    }

    pub fn queue(&self) -> &str {
        &self.config.queue
    }

    pub async fn enqueue(&self, job: RefreshJob) -> GateResult<Uuid> {
        let envelope = JobEnvelope::new(job);
        self.store
            .enqueue(&self.config.queue, envelope.to_payload()?)
            .await?;

        log::debug!("Enqueued job {} ({})", envelope.id, envelope.job);
        Ok(envelope.id)
    }

    /// Marks a job so the worker drops it instead of running it.
    pub async fn revoke(&self, job_id: Uuid) -> GateResult<()> {
        self.store.revoke_job(&job_id.to_string()).await?;
        log::info!("Revoked job {}", job_id);
        Ok(())
    }

    /// Links a wallet to a user and schedules it for the next reconcile pass.
    pub async fn connect_wallet(&self, user_id: UserId, address: &str) -> GateResult<()> {
        self.holdings.link_wallet(user_id, address)?;
        self.store
            .push_to_mailbox(Mailbox::Updated, &[address.to_string()])
            .await
    }

    pub async fn disconnect_wallet(&self, address: &str) -> GateResult<()> {
        self.store
            .push_to_mailbox(Mailbox::Disconnected, &[address.to_string()])
            .await
    }

    /// Stores premium and emoji status as reported by the chat layer, which
    /// sees them on every Telegram update.
    pub fn record_profile(&self, profile: &TelegramProfile) -> GateResult<()> {
        self.holdings.set_profile(profile)?;
        log::debug!(
            "Profile of user {} updated (premium: {})",
            profile.user_id.0,
            profile.is_premium
        );
        Ok(())
    }

    /// Puts every linked wallet under tracking. A wallet is enqueued only the
    /// first time its marker is set, so repeated runs enqueue nothing new.
    /// A marker whose job could not be enqueued is cleared again.
    pub async fn bootstrap(&self) -> GateResult<usize> {
        let mut enqueued = 0;

        for address in self.holdings.tracked_wallets()? {
            if !self
                .store
                .mark_tracked(&address, self.config.tracking_ttl)
                .await?
            {
                continue;
            }

            let job = RefreshJob::RefreshWallet {
                address: address.clone(),
            };
            if let Err(e) = self.enqueue(job).await {
                log::error!("Failed to enqueue wallet {}, clearing its marker: {}", address, e);
                if let Err(clear) = self.store.clear_tracked(&address).await {
                    log::error!("Failed to clear tracking marker of {}: {}", address, clear);
                }
                return Err(e);
            }
            enqueued += 1;
        }

        log::info!("Bootstrap enqueued {} wallets", enqueued);
        Ok(enqueued)
    }

    /// Drains the mailboxes. Updated wallets are fetched in batches and each
    /// batch is written in one transaction; failed fetches go back to the
    /// mailbox for the next pass. When a step fails, every drained entry not
    /// yet handled is put back before the error is returned.
    pub async fn reconcile(&self) -> GateResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let addresses = self.store.drain_mailbox(Mailbox::Updated).await?;
        report.drained = addresses.len();

        let batch_size = self.config.batch_size.max(1);
        for (index, batch) in addresses.chunks(batch_size).enumerate() {
            if let Err(e) = self.reconcile_batch(batch, &mut report).await {
                log::error!("Wallet batch {} failed, requeueing the rest: {}", index, e);
                self.restore(Mailbox::Updated, &addresses[index * batch_size..])
                    .await;
                return Err(e);
            }
        }

        let disconnected = self.store.drain_mailbox(Mailbox::Disconnected).await?;
        for (index, address) in disconnected.iter().enumerate() {
            if let Err(e) = self.disconnect(address).await {
                log::error!("Disconnecting {} failed, requeueing the rest: {}", address, e);
                self.restore(Mailbox::Disconnected, &disconnected[index..])
                    .await;
                return Err(e);
            }
            report.disconnected += 1;
        }

        for member in self.store.drain_mailbox(Mailbox::MembershipRevoked).await? {
            match MembershipRevocation::parse(&member) {
                Some(revocation) => {
                    log::info!(
                        "User {} left the external list of chat {}",
                        revocation.user_id.0,
                        revocation.chat_id.0
                    );
                    report.revocations.push(revocation);
                }
                None => log::warn!("Dropping malformed revocation '{}'", member),
            }
        }

        log::info!(
            "Reconcile: drained {}, written {}, requeued {}, disconnected {}, revoked {}",
            report.drained,
            report.written,
            report.requeued,
            report.disconnected,
            report.revocations.len()
        );

        Ok(report)
    }

    async fn reconcile_batch(
        &self,
        batch: &[String],
        report: &mut ReconcileReport,
    ) -> GateResult<()> {
        let (written, failed) = self.sync_batch(batch).await?;
        report.written += written;

        if !failed.is_empty() {
            report.requeued += failed.len();
            self.store.push_to_mailbox(Mailbox::Updated, &failed).await?;
        }

        Ok(())
    }

    async fn disconnect(&self, address: &str) -> GateResult<()> {
        let users = self.holdings.unlink_wallet(address)?;
        self.store.clear_tracked(address).await?;

        log::info!("Wallet {} disconnected from {} users", address, users.len());
        Ok(())
    }

    async fn restore(&self, mailbox: Mailbox, members: &[String]) {
        if let Err(e) = self.store.push_to_mailbox(mailbox, members).await {
            log::error!(
                "Failed to put {} entries back into {}: {}",
                members.len(),
                mailbox,
                e
            );
        }
    }

    /// Writes fetched wallets and the asset metadata seen with them.
    fn store_wallets(&self, wallets: Vec<IndexedWallet>) -> GateResult<usize> {
        let mut snapshots = Vec::with_capacity(wallets.len());
        let mut jettons = Vec::new();
        let mut collections = Vec::new();

        for wallet in wallets {
            snapshots.push(wallet.snapshot);
            jettons.extend(wallet.jettons);
            collections.extend(wallet.collections);
        }

        self.holdings.record_wallet_metadata(&jettons, &collections)?;
        self.holdings.apply_wallet_snapshots(&snapshots)
    }

    async fn sync_batch(&self, batch: &[String]) -> GateResult<(usize, Vec<String>)> {
        let results: Vec<(String, GateResult<IndexedWallet>)> = stream::iter(batch.iter().cloned())
            .map(|address| {
                let indexer = self.indexer.clone();
                async move {
                    let result = indexer.fetch_wallet(&address).await;
                    (address, result)
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut wallets = Vec::with_capacity(results.len());
        let mut failed = Vec::new();

        for (address, result) in results {
            match result {
                Ok(wallet) => wallets.push(wallet),
                Err(e) => {
                    log::warn!("Failed to fetch wallet {}: {}", address, e);
                    failed.push(address);
                }
            }
        }

        let written = self.store_wallets(wallets)?;
        Ok((written, failed))
    }

    /// Enqueues one refresh per enabled external source rule.
    pub async fn refresh_external_sources(&self) -> GateResult<usize> {
        let rules = self.rules.external_source_rules()?;

        for rule in &rules {
            self.enqueue(RefreshJob::RefreshExternalSource {
                chat_id: rule.chat_id,
                rule_id: rule.id,
            })
            .await?;
        }

        Ok(rules.len())
    }

    pub async fn refresh_external_source(&self, rule: &EligibilityRule) -> GateResult<WhitelistDiff> {
        self.fetcher
            .refresh(rule, &self.holdings, self.store.as_ref())
            .await
    }

    /// Re-indexes one gift collection, or every collection the market lists,
    /// while holding the market session exclusively. Returns how many
    /// collections were written.
    pub async fn run_gift_indexing(&self, collection_slug: Option<&str>) -> GateResult<usize> {
        let gifts = self
            .gifts
            .as_ref()
            .ok_or_else(|| GateError::Config("gift indexing is not configured".to_string()))?;

        let requested = collection_slug.map(str::to_string);
        let holdings = self.holdings.clone();
        let mut client = gifts.client.lock().await;

        gifts
            .lock
            .run_exclusive(&mut **client, move |client| {
                Box::pin(async move {
                    let slugs: Vec<String> = match requested {
                        Some(slug) => vec![slug],
                        None => match client.list_collections().await {
                            Ok(collections) => {
                                for collection in &collections {
                                    holdings.upsert_gift_collection(collection)?;
                                }
                                collections
                                    .into_iter()
                                    .map(|collection| collection.collection_slug)
                                    .collect()
                            }
                            Err(e) if e.is_degradable() => {
                                log::warn!(
                                    "Gift collection list unavailable, using stored ones: {}",
                                    e
                                );
                                holdings
                                    .gift_collections()?
                                    .into_iter()
                                    .map(|collection| collection.collection_slug)
                                    .collect()
                            }
                            Err(e) => return Err(e),
                        },
                    };

                    let mut indexed: usize = 0;

                    for slug in slugs {
                        match client.fetch_gift_collection(&slug).await {
                            Ok(items) => {
                                holdings.replace_gift_items(&slug, &items)?;
                                indexed += 1;
                            }
                            Err(e) if e.is_degradable() => {
                                log::warn!("Skipping gift collection {}: {}", slug, e);
                            }
                            Err(e) => return Err(e),
                        }
                    }

                    Ok(indexed)
                })
            })
            .await
    }

    /// Replaces a user's sticker holdings with what the sticker market reports.
    /// Returns how many stickers the user owns.
    pub async fn sync_stickers(&self, user_id: UserId) -> GateResult<usize> {
        let indexer = self
            .stickers
            .as_ref()
            .ok_or_else(|| GateError::Config("sticker indexing is not configured".to_string()))?;

        let stickers = indexer.fetch_stickers(user_id).await?;
        for collection in &stickers.collections {
            self.holdings.upsert_sticker_collection(collection)?;
        }
        self.holdings.replace_sticker_items(user_id, &stickers.items)?;

        Ok(stickers.items.len())
    }

    /// Enqueues one sticker refresh per known user.
    pub async fn refresh_stickers(&self) -> GateResult<usize> {
        let users = self.holdings.known_users()?;

        for user_id in &users {
            self.enqueue(RefreshJob::RefreshStickers { user_id: *user_id })
                .await?;
        }

        Ok(users.len())
    }

    /// Runs one dequeued job. Revoked jobs are dropped without touching anything.
    pub async fn handle_job(&self, envelope: &JobEnvelope) -> GateResult<JobOutcome> {
        if self.store.take_revocation(&envelope.id.to_string()).await? {
            log::info!("Skipping revoked job {} ({})", envelope.id, envelope.job);
            return Ok(JobOutcome::Revoked);
        }

        match &envelope.job {
            RefreshJob::RefreshWallet { address } => {
                let wallet = self.indexer.fetch_wallet(address).await?;
                self.store_wallets(vec![wallet])?;
            }
            RefreshJob::RefreshExternalSource { chat_id, rule_id } => {
                match self.rules.get_rule(*chat_id, *rule_id)? {
                    Some(rule)
                        if rule.is_enabled
                            && matches!(rule.kind, RuleKind::ExternalSource { .. }) =>
                    {
                        self.refresh_external_source(&rule).await?;
                    }
                    _ => {
                        log::info!(
                            "External source rule {} in chat {} is gone or disabled",
                            rule_id,
                            chat_id.0
                        );
                        return Ok(JobOutcome::Skipped);
                    }
                }
            }
            RefreshJob::RefreshGifts { collection_slug } => {
                self.run_gift_indexing(collection_slug.as_deref()).await?;
            }
            RefreshJob::RefreshStickers { user_id } => {
                self.sync_stickers(*user_id).await?;
            }
        }

        Ok(JobOutcome::Completed)
    }
}
