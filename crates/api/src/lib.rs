//! HTTP API server for seller inventory.
//!
//! Provides REST endpoints for product management, a CSV export, the
//! per-seller live alert stream (SSE) and audit log retrieval, with structured
//! logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod seller;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use domain::ProductService;
use event_bus::EventBus;
use metrics_exporter_prometheus::PrometheusHandle;
use notifications::{AuditLog, SubscriberRegistry};
use product_store::ProductStore;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Mutation engine over whichever adapters the process was started with.
pub type Products = ProductService<Arc<dyn ProductStore>, Arc<dyn EventBus>>;

/// Settings of the live alert stream.
#[derive(Debug, Clone, Copy)]
pub struct LiveSettings {
    /// Interval between keep-alive comments on an idle stream.
    pub heartbeat: Duration,
    /// Alerts buffered per connection before new ones are dropped for it.
    pub queue_capacity: usize,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(15),
            queue_capacity: 64,
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub products: Products,
    pub audit: Arc<dyn AuditLog>,
    pub registry: Arc<SubscriberRegistry>,
    pub live: LiveSettings,
}

/// Success body shared by the JSON endpoints: `{ "success": true, "data": ... }`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> axum::Json<Self> {
        axum::Json(Self {
            success: true,
            data,
        })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/products",
            get(routes::products::list).post(routes::products::create),
        )
        .route("/products/export", get(routes::products::export))
        .route(
            "/products/{id}",
            axum::routing::put(routes::products::update)
                .patch(routes::products::update)
                .delete(routes::products::remove),
        )
        .route("/events/stream", get(routes::events::stream))
        .route("/events/log", get(routes::events::log))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
