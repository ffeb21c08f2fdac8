//! Endpoints merging samples into the store.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use bytes::Bytes;
use meter_metrics::{MalformedMetricError, MetricSample};

use crate::endpoints::common::ApiError;
use crate::service::ServiceState;

/// `POST /update/{type}/{name}/{value}`
///
/// Responds with `OK` once the sample is stored.
pub async fn handle_plain(
    State(state): State<ServiceState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let sample = match MetricSample::parse_path(&kind, &name, &value) {
        Ok(sample) => sample,
        Err(MalformedMetricError::EmptyName) => return Err(ApiError::NotFound),
        Err(error) => return Err(error.into()),
    };

    state.metrics().apply_single(sample).await?;
    Ok("OK")
}

/// `POST /update/`
///
/// Responds with the stored sample. For counters, this is the accumulated total.
pub async fn handle_json(
    State(state): State<ServiceState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let sample: MetricSample = serde_json::from_slice(&body)?;
    let stored = state.metrics().apply_single(sample).await?;
    Ok(Json(stored))
}

/// `POST /updates/`
///
/// Responds with the stored entry of every distinct name in the batch.
pub async fn handle_batch(
    State(state): State<ServiceState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let batch: Vec<MetricSample> = serde_json::from_slice(&body)?;
    let stored = state.metrics().apply_batch(batch).await?;
    Ok(Json(stored))
}
