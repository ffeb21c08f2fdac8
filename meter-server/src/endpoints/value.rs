//! Endpoints reading single metrics back.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use bytes::Bytes;
use meter_metrics::{MetricKind, MetricQuery, MetricSample};

use crate::endpoints::common::ApiError;
use crate::service::ServiceState;

async fn lookup(
    state: &ServiceState,
    kind: MetricKind,
    name: &str,
) -> Result<MetricSample, ApiError> {
    match state.metrics().get(name).await? {
        Some(sample) if sample.kind() == kind => Ok(sample),
        _ => Err(ApiError::NotFound),
    }
}

/// `GET /value/{type}/{name}`
///
/// Responds with the plain value. Unknown types and metrics stored with another type are not
/// found.
pub async fn handle_plain(
    State(state): State<ServiceState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = kind
        .parse::<MetricKind>()
        .map_err(|_| ApiError::NotFound)?;
    let sample = lookup(&state, kind, &name).await?;
    Ok(sample.value().to_string())
}

/// `POST /value/`
///
/// Expects a `{"id": ..., "type": ...}` query and responds with the full sample.
pub async fn handle_json(
    State(state): State<ServiceState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let query: MetricQuery = serde_json::from_slice(&body)?;
    let sample = lookup(&state, query.kind, &query.id).await?;
    Ok(Json(sample))
}
