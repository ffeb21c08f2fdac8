use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::Request;
use axum::middleware::from_fn_with_state;
use meter_config::Config;
use meter_system::{Shutdown, ShutdownHandle};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::middlewares::{self, RequestDecompressionLayer};
use crate::service::ServiceState;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[source] io::Error),

    /// Accepting connections failed.
    #[error("server terminated abnormally")]
    ServeFailed(#[source] io::Error),
}

/// Builds the axum application with all routes and middleware.
pub fn make_app(state: ServiceState) -> Router {
    // Service builder order defines layers added first will be called first. This means:
    //  - Requests go from top to bottom
    //  - Responses go from bottom to top
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(state.clone(), middlewares::check_subnet))
        .layer(from_fn_with_state(state.clone(), middlewares::verify_integrity))
        .layer(RequestDecompressionLayer::new())
        .map_request(|request: Request<_>| request.map(Body::new))
        .layer(from_fn_with_state(state.clone(), middlewares::decrypt_payload))
        .layer(CompressionLayer::new())
        .layer(from_fn_with_state(state.clone(), middlewares::sign_response));

    crate::endpoints::routes(state.config())
        .layer(middleware)
        .with_state(state)
}

/// HTTP server of the collector.
///
/// The server stops accepting connections when a [`Shutdown`] is triggered and waits for pending
/// requests up to the shutdown timeout. Afterwards, the final snapshot is written.
pub struct HttpServer {
    config: Arc<Config>,
    state: ServiceState,
    listener: TcpListener,
}

impl HttpServer {
    /// Binds the listen address of the configuration.
    pub async fn bind(config: Arc<Config>, state: ServiceState) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.listen_addr())
            .await
            .map_err(ServerError::BindFailed)?;

        Ok(Self {
            config,
            state,
            listener,
        })
    }

    /// Returns the address the server accepts connections on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves requests until `shutdown` is notified.
    pub async fn run(self, shutdown: ShutdownHandle) -> Result<(), ServerError> {
        let Self {
            config,
            state,
            listener,
        } = self;

        meter_log::info!("spawning http server");
        if let Ok(addr) = listener.local_addr() {
            meter_log::info!("  listening on http://{addr}/");
        }

        state.metrics().start();

        let mut graceful = shutdown.clone();
        let server = axum::serve(listener, make_app(state.clone()))
            .with_graceful_shutdown(async move {
                graceful.notified().await;
                meter_log::info!("shutting down HTTP server");
            })
            .into_future();

        let mut forced = shutdown;
        let deadline = async move {
            let Shutdown { timeout } = forced.notified().await;
            if let Some(timeout) = timeout {
                tokio::time::sleep(timeout).await;
            }
        };

        tokio::select! {
            result = server => result.map_err(ServerError::ServeFailed)?,
            _ = deadline => meter_log::warn!("dropping pending requests after shutdown timeout"),
        }

        let close = state.metrics().close();
        if tokio::time::timeout(config.shutdown_timeout(), close)
            .await
            .is_err()
        {
            meter_log::error!("final snapshot did not complete within the shutdown timeout");
        }

        Ok(())
    }
}
