use anyhow::Result;
use gatekeeper_core::jobs::registry::{JobDefinition, JobRegistry};
use tokio_cron_scheduler::{Job, JobScheduler};

fn cron_job(definition: &JobDefinition) -> Result<Job> {
    let name = definition.name.clone();
    let handler = definition.handler.clone();

    Job::new_async(definition.schedule.as_str(), move |_uuid, _l| {
        let name = name.clone();
        let handler = handler.clone();
        Box::pin(async move {
            match handler().await {
                Ok(()) => log::info!("Job {} finished", name),
                Err(e) => log::error!("Job {} failed: {}", name, e),
            }
        })
    })
    .map_err(|e| anyhow::anyhow!("Failed to create cron job {}: {}", definition.name, e))
}

pub async fn schedule_jobs(registry: &JobRegistry) -> Result<JobScheduler> {
    log::info!("Initializing job scheduler...");

    let scheduler = match JobScheduler::new().await {
        Ok(scheduler) => scheduler,
        Err(e) => {
            log::error!("Failed to create job scheduler: {}", e);
            return Err(anyhow::anyhow!("Failed to create job scheduler: {}", e));
        }
    };

    for definition in registry.definitions() {
        let job = cron_job(definition)?;

        if let Err(e) = scheduler.add(job).await {
            log::error!("Failed to add {} job to scheduler: {}", definition.name, e);
            return Err(anyhow::anyhow!("Failed to add {} job: {}", definition.name, e));
        }
    }

    if let Err(e) = scheduler.start().await {
        log::error!("Failed to start job scheduler: {}", e);
        return Err(anyhow::anyhow!("Failed to start scheduler: {}", e));
    }

    log::info!("Job scheduler started with {} jobs", registry.len());
    Ok(scheduler)
}
