//! HTTP server setup.
//!
//! Builds the Axum router over a shared `WithdrawalService`, wires request
//! IDs, tracing and the request timeout, and serves until shutdown.

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::http::handlers;
use crate::lifecycle::Shutdown;
use crate::withdrawals::service::WithdrawalService;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WithdrawalService>,
}

/// HTTP server for the withdrawal API.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(service: Arc<WithdrawalService>, config: &ServerConfig) -> Self {
        let state = AppState { service };
        let router = Self::build_router(state, Duration::from_secs(config.request_timeout_secs));
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
        Router::new()
            .route("/health", get(handlers::health))
            .route("/nonce/{address}", get(handlers::get_nonce))
            .route("/validate-nonce", post(handlers::validate_nonce))
            .route("/create-transaction", post(handlers::create_transaction))
            .route("/execute-withdrawal", post(handlers::execute_withdrawal))
            .route("/transactions/{hash}", get(handlers::get_transaction))
            .route(
                "/transactions/{hash}/reconcile",
                post(handlers::reconcile_transaction),
            )
            .route("/transactions/{hash}/speed-up", post(handlers::speed_up))
            .route(
                "/warehouse/withdrawals",
                post(handlers::create_warehouse_withdrawal).get(handlers::list_warehouse_withdrawals),
            )
            .route(
                "/warehouse/withdrawals/{id}",
                get(handlers::get_warehouse_withdrawal),
            )
            .route(
                "/warehouse/withdrawals/{id}/resume",
                post(handlers::resume_warehouse_withdrawal),
            )
            .route(
                "/warehouse/withdrawals/{id}/reconcile",
                post(handlers::reconcile_warehouse_withdrawal),
            )
            .route(
                "/warehouse/withdrawals/{id}/cancel",
                post(handlers::cancel_warehouse_withdrawal),
            )
            .fallback(handlers::not_found)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(request_timeout))
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(Shutdown::wait(shutdown))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }
}
