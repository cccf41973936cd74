//! HTTP API server implementation
//!
//! This module provides the main HTTP server implementation using Axum.

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::routes;
use crate::config::ServerConfig;
use crate::types::KilnError;
use crate::ControlPlane;

/// HTTP API Server configuration
#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Enable request tracing
    pub enable_tracing: bool,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for HttpApiConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            bind_address: server.host.clone(),
            port: server.port,
            enable_cors: server.enable_cors,
            enable_tracing: server.enable_tracing,
        }
    }
}

/// HTTP API Server
pub struct HttpApiServer {
    config: HttpApiConfig,
    plane: Arc<ControlPlane>,
}

impl HttpApiServer {
    pub fn new(config: HttpApiConfig, plane: Arc<ControlPlane>) -> Self {
        Self { config, plane }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.bind_address, self.config.port)
    }

    /// Serve until the process is stopped
    pub async fn start(&self) -> Result<(), KilnError> {
        self.start_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, letting in-flight requests finish.
    pub async fn start_with_shutdown<F>(&self, shutdown: F) -> Result<(), KilnError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = create_router(self.plane.clone(), &self.config);

        let addr = self.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| KilnError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

        tracing::info!("HTTP API server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| KilnError::Internal(format!("Server error: {}", e)))?;

        tracing::info!("HTTP API server stopped");
        Ok(())
    }
}

/// Create the Axum router with all routes and middleware
pub fn create_router(plane: Arc<ControlPlane>, config: &HttpApiConfig) -> Router {
    let mut router = Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/status", get(routes::status))
        .route("/api/models", get(routes::list_models))
        .route("/api/models/:role", get(routes::get_model))
        .route("/api/gpu", get(routes::gpu))
        .route("/api/services", get(routes::list_services))
        .route("/api/services/:id", get(routes::get_service))
        .route("/api/services/:id/start", post(routes::start_service))
        .route("/api/services/:id/restart", post(routes::restart_service))
        .route("/api/logs", get(routes::logs))
        .route("/api/cloud/costs", get(routes::cloud_costs))
        .route("/api/chat", post(routes::chat))
        .route("/api/generate", post(routes::generate))
        .route("/api/tags", get(routes::tags))
        .with_state(plane);

    // Add middleware conditionally
    if config.enable_tracing {
        router = router.layer(TraceLayer::new_for_http());
    }

    if config.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}
