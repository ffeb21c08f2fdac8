//! Middlewares for the HTTP server.
//!
//! This module exposes the request checks that run before any endpoint. They are registered as
//! layers on the [`Router`](axum::Router) in [`make_app`](crate::server::make_app), in this order:
//!
//!  1. [`check_subnet`]
//!  2. [`verify_integrity`], on the body as sent
//!  3. [`RequestDecompressionLayer`]
//!  4. [`decrypt_payload`], on the decompressed body
//!
//! Responses to signed requests are signed in turn by [`sign_response`].
//!
//! Middlewares that buffer the body apply the collector's `max_body_size`, as do the endpoints
//! through [`DefaultBodyLimit`](axum::extract::DefaultBodyLimit).

mod decryption;
mod integrity;
mod signing;
mod subnet;

use axum::body::{Body, Bytes};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_LENGTH;

use crate::endpoints::ApiError;

pub use self::decryption::*;
pub use self::integrity::*;
pub use self::signing::*;
pub use self::subnet::*;
pub use tower_http::decompression::RequestDecompressionLayer;

/// Buffers a request body of at most `limit` bytes.
///
/// A `Content-Length` above the limit is rejected before reading. Streamed bodies that exceed the
/// limit fail to read.
async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, ApiError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());

    if declared.is_some_and(|length| length > limit) {
        return Err(ApiError::PayloadTooLarge(limit));
    }

    Ok(axum::body::to_bytes(body, limit).await?)
}
