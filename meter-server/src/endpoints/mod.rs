//! Web server endpoints.
//!
//! Agents report through the `/update` endpoints. The `/value` endpoints and the listing at `/`
//! read the store back.

mod common;
mod health_check;
mod list;
mod update;
mod value;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use meter_config::Config;

pub use self::common::*;
use crate::service::ServiceState;

/// Returns all routes of the collector.
pub fn routes(config: &Config) -> Router<ServiceState> {
    Router::new()
        .route("/", get(list::handle))
        .route("/ping", get(health_check::handle))
        .route("/update/", post(update::handle_json))
        .route("/update/{kind}/{name}/{value}", post(update::handle_plain))
        .route("/updates", post(update::handle_batch))
        .route("/updates/", post(update::handle_batch))
        .route("/value/", post(value::handle_json))
        .route("/value/{kind}/{name}", get(value::handle_plain))
        .layer(DefaultBodyLimit::max(config.max_body_size()))
}
