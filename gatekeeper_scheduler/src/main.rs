mod job;

use gatekeeper_core::config::GatekeeperConfig;
use gatekeeper_core::dependencies::GatekeeperDependencies;

use crate::job::handler::{BOOTSTRAP_JOB, register_jobs};
use crate::job::job_scheduler::schedule_jobs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();
    log::info!("Starting gatekeeper_scheduler...");

    let config = GatekeeperConfig::from_env()?;
    let dependencies = GatekeeperDependencies::from_config(&config).await?;

    let registry = register_jobs(dependencies.pipeline.clone())?;

    if let Err(e) = registry.run(BOOTSTRAP_JOB).await {
        log::error!("Initial wallet bootstrap failed: {}", e);
    }

    let mut scheduler = schedule_jobs(&registry).await?;

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down job scheduler...");

    if let Err(e) = scheduler.shutdown().await {
        log::error!("Failed to shut down job scheduler: {}", e);
    }

    Ok(())
}
