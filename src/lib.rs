pub mod callback;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod process;
pub mod profile;
pub mod queue;
pub mod session;
pub mod shutdown;
pub mod status;
pub mod worker;

use worker::Worker;

pub async fn run_worker(config: config::WorkerConfig) -> error::Result<()> {
    tracing::info!(
        port_range = format!("{}-{}", config.port_start, config.port_end),
        max_sessions = config.max_sessions,
        "starting worker"
    );
    Worker::new(config).run().await
}
