//! Error responses shared by all endpoints and middlewares.

use std::error::Error;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use meter_auth::{CipherError, DigestError};
use meter_metrics::MalformedMetricError;
use meter_statsd::metric;
use meter_store::StoreError;
use serde::Serialize;

use crate::statsd::CollectorCounters;

/// The JSON body of an error response.
#[derive(Debug, Default, Serialize)]
pub struct ApiErrorResponse {
    detail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
}

impl ApiErrorResponse {
    /// Creates an error response from an error and its chain of sources.
    pub fn from_error(error: &(dyn Error + 'static)) -> Self {
        let mut messages = Vec::new();
        let mut current = Some(error);

        while let Some(error) = current {
            let message = error.to_string();
            if !messages.contains(&message) {
                messages.push(message);
            }
            current = error.source();
        }

        let mut messages = messages.into_iter();
        Self {
            detail: messages.next(),
            causes: messages.collect(),
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// An error rejecting a request at the ingestion boundary.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A sample violates the metric protocol.
    #[error("invalid metric")]
    Malformed(#[from] MalformedMetricError),

    /// The body is not valid JSON of the expected shape.
    #[error("invalid JSON payload")]
    InvalidJson(#[from] serde_json::Error),

    /// The body could not be read or decompressed.
    #[error("failed to read request body")]
    InvalidBody(#[from] axum::Error),

    /// The declared body size exceeds the configured limit.
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// The `HashSHA256` header does not match the body.
    #[error("payload integrity check failed")]
    Integrity(#[from] DigestError),

    /// The body could not be decrypted.
    #[error("failed to decrypt payload")]
    Decryption(#[from] CipherError),

    /// The sender is outside of the trusted subnet.
    #[error("sender is not in the trusted subnet")]
    UntrustedSender,

    /// The requested metric does not exist or has another type.
    #[error("metric not found")]
    NotFound,

    /// The store failed to serve the request.
    #[error("failed to access metric store")]
    Store(#[from] StoreError),
}

impl ApiError {
    /// Returns the status code of the response.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Malformed(_)
            | Self::InvalidJson(_)
            | Self::InvalidBody(_)
            | Self::Integrity(_)
            | Self::Decryption(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UntrustedSender => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the tag value for [`CollectorCounters::RequestsRejected`].
    fn rejection_reason(&self) -> Option<&'static str> {
        Some(match self {
            Self::Malformed(_) => "malformed",
            Self::InvalidJson(_) => "invalid_json",
            Self::InvalidBody(_) => "invalid_body",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Integrity(_) => "integrity",
            Self::Decryption(_) => "decryption",
            Self::UntrustedSender => "untrusted_sender",
            Self::NotFound | Self::Store(_) => return None,
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            meter_log::error!(error = &self as &dyn Error, "request failed");
        } else {
            meter_log::debug!(error = &self as &dyn Error, "request rejected");
        }

        if let Some(reason) = self.rejection_reason() {
            metric!(counter(CollectorCounters::RequestsRejected) += 1, reason = reason);
        }

        (status, ApiErrorResponse::from_error(&self)).into_response()
    }
}
