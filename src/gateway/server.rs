//! # HTTP Server Module
//!
//! Assembles the axum application: the admission middleware wraps the
//! forwarding fallback, `/health` sits outside admission, and tracing plus the
//! overall request timeout wrap everything.
//!
//! Layer order, outermost first:
//!
//! ```text
//! TraceLayer -> HandleErrorLayer -> timeout -> admission_middleware -> forward_request
//! ```
//!
//! When the timeout fires (or the client disconnects) the inner future is
//! dropped, cancelling any in-flight identity lookup or upstream call. An
//! elapsed timeout is answered with the unclassified JSON envelope.

use axum::error_handling::HandleErrorLayer;
use axum::http::{Method, StatusCode, Uri};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{BoxError, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::timeout::error::Elapsed;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::gateway::forward::{forward_request, UpstreamForwarder};
use crate::internal_error;
use crate::middleware::admission::{admission_middleware, AdmissionPipeline, AdmissionState};
use crate::middleware::error_handling::ErrorTranslator;

/// The assembled gateway
pub struct GatewayServer {
    bind_addr: SocketAddr,
    app: Router,
}

impl GatewayServer {
    /// Build every component from validated configuration
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let bind_addr = format!("{}:{}", config.server.bind_address, config.server.http_port)
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid bind address: {}", e)))?;

        let pipeline = Arc::new(AdmissionPipeline::from_config(&config.auth)?);
        let forwarder = Arc::new(UpstreamForwarder::from_config(config)?);
        info!(routes = forwarder.routes().len(), "Route table loaded");

        Ok(Self {
            bind_addr,
            app: build_app(pipeline, forwarder, config.server.request_timeout),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// The assembled application, for in-process testing
    pub fn app(&self) -> Router {
        self.app.clone()
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    #[instrument(skip_all, fields(addr = %self.bind_addr))]
    pub async fn serve<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind_addr).await.map_err(|e| {
            GatewayError::internal(format!("Failed to bind gateway server to {}: {}", self.bind_addr, e))
        })?;
        info!("Gateway HTTP server listening on {}", self.bind_addr);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e)))
    }
}

/// Wire admission, forwarding and the ambient layers together
pub fn build_app(
    pipeline: Arc<AdmissionPipeline>,
    forwarder: Arc<UpstreamForwarder>,
    request_timeout: Duration,
) -> Router {
    let admission = AdmissionState::new(pipeline);

    Router::new()
        .fallback(forward_request)
        .layer(from_fn_with_state(admission, admission_middleware))
        .route("/health", get(health_check))
        .with_state(forwarder)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout))
                .timeout(request_timeout),
        )
        .layer(TraceLayer::new_for_http())
}

/// Render a failure from the timeout layer as an error envelope
async fn handle_timeout(method: Method, uri: Uri, error: BoxError) -> Response {
    let failure = if error.is::<Elapsed>() {
        warn!(method = %method, path = %uri.path(), "Request timed out");
        internal_error!("request to {} timed out", uri.path())
    } else {
        internal_error!("unhandled middleware error: {}", error)
    };
    ErrorTranslator::new().respond(&method, uri.path(), failure)
}

/// Gateway health check handler
pub async fn health_check() -> impl IntoResponse {
    let health_info = serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": "gateway"
    });

    (StatusCode::OK, axum::Json(health_info))
}
