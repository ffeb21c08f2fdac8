//! The health check agents call before switching to batch delivery.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::service::ServiceState;

/// `GET /ping`
pub async fn handle(State(state): State<ServiceState>) -> impl IntoResponse {
    if state.metrics().health().await {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
