// Read-only HTTP and WebSocket API over a running pipeline

pub mod query;
pub mod websocket;

pub use query::create_query_router;
pub use websocket::{create_ws_router, ws_handler};

use crate::pipeline::SyncHandle;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

/// Shared state for all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub handle: SyncHandle,
    /// Interval between WebSocket status updates
    pub status_interval: Duration,
}

impl ApiState {
    pub fn new(handle: SyncHandle, status_interval: Duration) -> Self {
        Self {
            handle,
            status_interval,
        }
    }
}

/// Full read API: queries, change feed, permissive CORS
pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .merge(create_query_router(Arc::clone(&state)))
        .merge(create_ws_router(state))
        .layer(CorsLayer::permissive())
}
