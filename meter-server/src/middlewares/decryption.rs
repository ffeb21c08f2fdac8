use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use meter_auth::CIPHERED_HEADER;

use crate::endpoints::ApiError;
use crate::middlewares::read_body;
use crate::service::ServiceState;

/// Returns `true` if the request declares an encrypted body.
fn is_ciphered(request: &Request) -> bool {
    request
        .headers()
        .get(CIPHERED_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

/// Decrypts bodies sent with `Ciphered: true`.
///
/// Runs after decompression. Without a configured private key, the body is passed on as is and
/// fails to parse. Use this with [`axum::middleware::from_fn_with_state`].
pub async fn decrypt_payload(
    State(state): State<ServiceState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(key) = state.decryption_key() else {
        return Ok(next.run(request).await);
    };

    if !is_ciphered(&request) {
        return Ok(next.run(request).await);
    }

    let (mut parts, body) = request.into_parts();
    let body = read_body(&parts.headers, body, state.config().max_body_size()).await?;
    let decrypted = key.decrypt(&body)?;

    parts.headers.remove(CIPHERED_HEADER);
    parts.headers.remove(header::CONTENT_LENGTH);

    Ok(next.run(Request::from_parts(parts, Body::from(decrypted))).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(value: &str) -> Request {
        Request::post("/updates/")
            .header(CIPHERED_HEADER, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_is_ciphered() {
        assert!(is_ciphered(&request("true")));
        assert!(is_ciphered(&request(" TRUE ")));

        assert!(!is_ciphered(&request("false")));
        assert!(!is_ciphered(&request("untrue")));
        assert!(!is_ciphered(&request("true1")));
        assert!(!is_ciphered(&Request::new(Body::empty())));
    }
}
