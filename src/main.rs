//! sensibo-bridge - Sensibo cloud thermostat bridge
//!
//! Polls pod measurements and configuration, and applies commands to pods
//! through a read-merge-write of their acState.

mod api;
mod config;
mod error;
mod models;
mod node;
mod sensibo;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::BridgeState;
use crate::node::NodeManager;
use crate::sensibo::{SensiboApi, SensiboClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sensibo_bridge=info,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting sensibo-bridge...");

    // Load configuration
    let config = config::Config::load()?;
    tracing::info!("Configuration loaded ({} nodes)", config.nodes.len());

    let sensibo: Arc<dyn SensiboApi> = Arc::new(SensiboClient::new(&config.sensibo)?);

    // Start nodes
    let nodes = Arc::new(NodeManager::new(sensibo.clone(), config.sensibo.api_key.clone()));
    nodes.start_all(&config.nodes).await;

    start_event_log(&nodes);

    let state = BridgeState {
        nodes: nodes.clone(),
        sensibo,
        api_key: config.sensibo.api_key.clone(),
    };

    let app = api::routes().with_state(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    nodes.shutdown_all().await;
    tracing::info!("sensibo-bridge stopped");

    Ok(())
}

/// Log every outbound node event
fn start_event_log(nodes: &NodeManager) {
    let mut events = nodes.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match &event.error {
                    None => tracing::info!(
                        "[Event] {} -> {}",
                        event.node,
                        serde_json::to_string(&event.message).unwrap_or_default()
                    ),
                    Some(e) => tracing::warn!("[Event] {} -> error: {}", event.node, e),
                },
                Err(RecvError::Lagged(n)) => tracing::warn!("[Event] {} events dropped", n),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
