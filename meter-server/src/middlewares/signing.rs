use std::error::Error;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use meter_auth::HASH_HEADER;

use crate::service::ServiceState;

/// Adds a `HashSHA256` header over the response body to responses of signed requests.
///
/// Only requests that carried the header themselves get a signed response, and only if a key is
/// configured. The digest covers the body before response compression. Use this with
/// [`axum::middleware::from_fn_with_state`].
pub async fn sign_response(
    State(state): State<ServiceState>,
    request: Request,
    next: Next,
) -> Response {
    let signed = request.headers().contains_key(HASH_HEADER);
    let response = next.run(request).await;

    let Some(key) = state.signing_key().filter(|_| signed) else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(error) => {
            meter_log::error!(
                error = &error as &dyn Error,
                "failed to buffer response for signing"
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Ok(signature) = HeaderValue::try_from(key.sign(&body)) {
        parts.headers.insert(HASH_HEADER, signature);
    }

    Response::from_parts(parts, Body::from(body))
}
