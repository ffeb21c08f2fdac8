//! The meter agent.
//!
//! The [`Agent`] runs two independent timers. The collection timer samples runtime statistics
//! into a local [`MemoryStore`](meter_store::MemoryStore). The delivery timer reads the configured
//! metrics back, encodes them into [`Upload`]s and hands them to a bounded worker pool that posts
//! them to the collector.
//!
//! Whether the collector accepts JSON batches is checked once through `GET /ping` and cached for
//! the lifetime of the agent. Without batch support every metric is sent twice, once on the plain
//! path endpoint and once as a JSON document.
//!
//! On shutdown, both timers are stopped and deliveries that are already in flight are drained
//! within the `shutdown_timeout`.
#![warn(missing_docs)]

mod agent;
mod payload;
mod sampler;
mod statsd;
mod upstream;

use std::sync::Arc;

use anyhow::{Context, Result};
use meter_config::Config;
use meter_system::{Controller, Shutdown};

pub use self::agent::*;
pub use self::payload::*;
pub use self::sampler::*;
pub use self::upstream::*;

/// Runs the agent until it receives a shutdown signal.
///
/// This blocks the current thread on a new multi-threaded tokio runtime.
pub fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("agent")
        .enable_all()
        .build()
        .context("could not create runtime")?;

    runtime.block_on(async {
        let controller = Controller::start(config.shutdown_timeout());

        let agent = Agent::new(Arc::clone(&config))
            .await
            .context("could not start agent")?;
        let collecting = agent.start_collecting();
        let delivering = agent.start_delivering();

        let Shutdown { timeout } = controller.handle().notified().await;

        let stop = async {
            if let Some(handle) = collecting {
                handle.stop().await;
            }
            if let Some(handle) = delivering {
                handle.stop().await;
            }
        };

        match timeout {
            Some(timeout) => {
                if tokio::time::timeout(timeout, stop).await.is_err() {
                    meter_log::warn!("dropping pending uploads after shutdown timeout");
                }
            }
            None => meter_log::info!("forced shutdown, dropping pending uploads"),
        }

        meter_log::info!("agent stopped");
        Ok(())
    })
}
