//! HTTP surface: axum router, shared state and request handlers.

mod accounts;
mod auth;
mod cohorts;
mod data;
mod envelope;
mod extract;
mod health;
mod records;
mod tags;
mod types;

pub use envelope::Envelope;
pub use extract::{AuthUser, QueryParams, ValidatedJson};

use axum::{http::HeaderValue, middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::metrics;
use crate::storage::DatabaseStorage;

#[derive(Clone)]
pub struct AppState {
    pub storage: DatabaseStorage,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(storage: DatabaseStorage, config: Config) -> Self {
        Self {
            storage,
            config: Arc::new(config),
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

/// Create the HTTP router with every route.
pub fn create_server(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .merge(health::routes())
        .merge(auth::routes())
        .merge(accounts::routes())
        .merge(types::routes())
        .merge(records::routes())
        .merge(tags::routes())
        .merge(cohorts::routes())
        .merge(data::routes())
        .layer(middleware::from_fn(metrics::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn start_server(state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()
        .map_err(|e| crate::error::ApiError::Config(format!("invalid listen address: {e}")))?;
    let app = create_server(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server running on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
