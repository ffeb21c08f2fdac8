use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use meter_auth::{DigestError, HASH_HEADER};

use crate::endpoints::ApiError;
use crate::middlewares::read_body;
use crate::service::ServiceState;

/// Verifies the `HashSHA256` header against the body exactly as it was sent.
///
/// Requests without the header, and all requests when no key is configured, pass unchecked. A
/// present but empty or malformed header is rejected. Use this with
/// [`axum::middleware::from_fn_with_state`].
pub async fn verify_integrity(
    State(state): State<ServiceState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(key) = state.signing_key() else {
        return Ok(next.run(request).await);
    };

    let signature = match request.headers().get(HASH_HEADER) {
        Some(value) => value
            .to_str()
            .map_err(|_| DigestError::BadEncoding)?
            .to_owned(),
        None => return Ok(next.run(request).await),
    };

    let (parts, body) = request.into_parts();
    let body = read_body(&parts.headers, body, state.config().max_body_size()).await?;
    key.verify(&body, &signature)?;

    Ok(next.run(Request::from_parts(parts, Body::from(body))).await)
}
