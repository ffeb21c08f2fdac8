use std::net::IpAddr;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use meter_auth::REAL_IP_HEADER;

use crate::endpoints::ApiError;
use crate::service::ServiceState;

/// Rejects requests whose `X-Real-IP` is missing or outside of the trusted subnet.
///
/// Passes all requests if no subnet is configured. Use this with
/// [`axum::middleware::from_fn_with_state`].
pub async fn check_subnet(
    State(state): State<ServiceState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(subnet) = state.trusted_subnet() {
        let sender = request
            .headers()
            .get(REAL_IP_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok());

        match sender {
            Some(ip) if subnet.contains(ip) => (),
            _ => return Err(ApiError::UntrustedSender),
        }
    }

    Ok(next.run(request).await)
}
