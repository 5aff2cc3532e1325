//! API module - HTTP handlers and routes

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::node::NodeManager;
use crate::sensibo::SensiboApi;

/// Shared state for the admin API
#[derive(Clone)]
pub struct BridgeState {
    pub nodes: Arc<NodeManager>,
    pub sensibo: Arc<dyn SensiboApi>,
    pub api_key: String,
}

pub fn routes() -> Router<BridgeState> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::health_check))
        // Device lookup for node configuration
        .route("/sensibo", get(handlers::lookup))
        // Nodes
        .route("/api/nodes", get(handlers::list_nodes))
        .route("/api/nodes/:name", get(handlers::get_node))
        .route("/api/nodes/:name/input", post(handlers::deliver_input))
        .route("/api/nodes/:name/poll-interval", put(handlers::update_poll_interval))
}
