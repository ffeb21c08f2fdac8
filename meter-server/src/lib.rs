//! The meter collector.
//!
//! The collector receives samples from agents over HTTP, merges them into a
//! [`MetricStore`](meter_store::MetricStore) and serves them back for inspection. See
//! [`endpoints`] for the routes and [`middlewares`] for the checks every request passes first.
//!
//! # Storage
//!
//! With a `database_dsn`, samples go to the relational store, which is durable on its own.
//! Otherwise they are kept in memory and written to `file_storage_path` as a full snapshot, either
//! every `store_interval` seconds or, with an interval of `0`, after every update. The snapshot is
//! loaded on startup if `restore` is set.
//!
//! # Shutdown
//!
//! On SIGTERM, the server stops accepting connections and finishes pending requests within the
//! `shutdown_timeout`. The snapshot timer is stopped and a final snapshot is written. SIGINT and
//! SIGQUIT skip waiting for pending requests.
#![warn(missing_docs)]

pub mod endpoints;
pub mod middlewares;
mod server;
mod service;
mod statsd;

use std::sync::Arc;

use anyhow::{Context, Result};
use meter_config::Config;
use meter_system::Controller;

pub use self::server::*;
pub use self::service::*;

/// Runs the collector until it receives a shutdown signal.
///
/// This blocks the current thread on a new multi-threaded tokio runtime.
pub fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("collector")
        .enable_all()
        .build()
        .context("could not create runtime")?;

    runtime.block_on(async {
        let controller = Controller::start(config.shutdown_timeout());

        let state = ServiceState::start(Arc::clone(&config))
            .await
            .context("could not start collector")?;
        let server = HttpServer::bind(Arc::clone(&config), state).await?;
        server.run(controller.handle()).await?;

        meter_log::info!("collector stopped");
        Ok(())
    })
}
