use anyhow::Result;
use gatekeeper_core::jobs::dto::RefreshJob;
use gatekeeper_core::jobs::registry::{JobDefinition, JobRegistry};
use gatekeeper_core::pipeline::handler::OwnershipSyncPipeline;

pub const BOOTSTRAP_JOB: &str = "bootstrap_wallets";
pub const RECONCILE_JOB: &str = "reconcile_wallets";
pub const EXTERNAL_SOURCES_JOB: &str = "refresh_external_sources";
pub const GIFTS_JOB: &str = "refresh_gifts";
pub const STICKERS_JOB: &str = "refresh_stickers";

pub fn job_bootstrap_wallets(pipeline: OwnershipSyncPipeline) -> JobDefinition {
    JobDefinition::new(BOOTSTRAP_JOB, "0 0 */6 * * *", move || {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            pipeline.bootstrap().await.map(|enqueued| {
                log::info!("Bootstrap put {} new wallets under tracking", enqueued);
            })
        })
    })
}

pub fn job_reconcile_wallets(pipeline: OwnershipSyncPipeline) -> JobDefinition {
    JobDefinition::new(RECONCILE_JOB, "0 * * * * *", move || {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            pipeline.reconcile().await.map(|report| {
                if !report.revocations.is_empty() {
                    log::info!(
                        "{} users lost external source membership",
                        report.revocations.len()
                    );
                }
            })
        })
    })
}

pub fn job_refresh_external_sources(pipeline: OwnershipSyncPipeline) -> JobDefinition {
    JobDefinition::new(EXTERNAL_SOURCES_JOB, "0 */10 * * * *", move || {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            pipeline.refresh_external_sources().await.map(|enqueued| {
                log::info!("Enqueued {} external source refreshes", enqueued);
            })
        })
    })
}

pub fn job_refresh_gifts(pipeline: OwnershipSyncPipeline) -> JobDefinition {
    JobDefinition::new(GIFTS_JOB, "0 30 * * * *", move || {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            pipeline
                .enqueue(RefreshJob::RefreshGifts {
                    collection_slug: None,
                })
                .await
                .map(|job_id| log::info!("Enqueued gift refresh {}", job_id))
        })
    })
}

pub fn job_refresh_stickers(pipeline: OwnershipSyncPipeline) -> JobDefinition {
    JobDefinition::new(STICKERS_JOB, "0 15 * * * *", move || {
        let pipeline = pipeline.clone();
        Box::pin(async move {
            pipeline.refresh_stickers().await.map(|enqueued| {
                log::info!("Enqueued {} sticker refreshes", enqueued);
            })
        })
    })
}

/// Every periodic job this process runs. Nothing is registered implicitly.
pub fn register_jobs(pipeline: OwnershipSyncPipeline) -> Result<JobRegistry> {
    let mut registry = JobRegistry::new();

    registry.register(job_bootstrap_wallets(pipeline.clone()))?;
    registry.register(job_reconcile_wallets(pipeline.clone()))?;
    registry.register(job_refresh_external_sources(pipeline.clone()))?;
    registry.register(job_refresh_gifts(pipeline.clone()))?;

    if pipeline.sticker_indexing_enabled() {
        registry.register(job_refresh_stickers(pipeline))?;
    }

    Ok(registry)
}
