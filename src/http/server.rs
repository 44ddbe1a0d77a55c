//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all proxy handler
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Serve the listener until shutdown, with the request tracer alongside
//!
//! # Design Decisions
//! - Every path and method goes to the same handler; the orchestrator decides
//! - The outer timeout covers connect plus request time so downstream
//!   timeouts surface as 504 from the forwarder first

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::error::StartupError;
use crate::http::orchestrator::Orchestrator;
use crate::http::request::{propagate_request_id_layer, request_span, set_request_id_layer};
use crate::lifecycle::{shutdown, Shutdown};

/// HTTP server for the content-modifying proxy.
pub struct HttpServer {
    router: Router,
    config: Arc<ProxyConfig>,
    orchestrator: Arc<Orchestrator>,
}

impl HttpServer {
    /// Create a new HTTP server. Fails when a modifier script does not compile.
    pub fn new(config: ProxyConfig) -> Result<Self, StartupError> {
        let config = Arc::new(config);
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&config))?);
        let router = Self::build_router(&config, Arc::clone(&orchestrator));
        Ok(Self {
            router,
            config,
            orchestrator,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, orchestrator: Arc<Orchestrator>) -> Router {
        let timeout = Duration::from_secs(config.timeouts.connect_secs + config.timeouts.request_secs);
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(orchestrator)
            .layer(RequestBodyLimitLayer::new(config.proxy.max_body_size))
            .layer(TimeoutLayer::new(timeout))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http().make_span_with(request_span))
            .layer(set_request_id_layer())
    }

    /// Run the server, accepting connections on the given listener until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            serving_host = %self.config.host_mapping.serving_host,
            downstream_host = %self.config.host_mapping.downstream_host,
            "HTTP server starting"
        );

        tokio::spawn(self.orchestrator.tracer().run(shutdown.subscribe()));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::wait(shutdown.subscribe()))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

async fn proxy_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    orchestrator.handle(request, addr).await
}
