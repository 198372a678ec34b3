mod error;
mod worker;

use error::{ConsumerError, ConsumerResult};
use gatekeeper_core::config::GatekeeperConfig;
use gatekeeper_core::dependencies::GatekeeperDependencies;

use crate::worker::Worker;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> ConsumerResult<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = GatekeeperConfig::from_env()?;
    let consumer_id = config.consumer_id.clone();

    log::info!("[{}] Starting Gatekeeper Consumer...", consumer_id);
    log::info!("[{}] Connecting to Redis", consumer_id);

    let dependencies = GatekeeperDependencies::from_config(&config)
        .await
        .map_err(|e| {
            ConsumerError::ConnectionFailed(format!("Failed to initialise dependencies: {}", e))
        })?;

    log::info!("[{}] Connected to Redis successfully", consumer_id);
    log::info!(
        "[{}] Starting consumer loop on queue {}...",
        consumer_id,
        dependencies.pipeline.queue()
    );

    Worker::new(consumer_id, dependencies.store, dependencies.pipeline)
        .run()
        .await
}
