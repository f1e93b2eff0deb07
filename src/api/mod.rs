//! HTTP API using Axum
//!
//! - Websockets: viewers (`/ws`) and barriers (`/barrier/:id`)
//! - REST plumbing for teams, races and operator crossing corrections
//! - Optional pre-shared key auth and a uniform error body

pub mod auth;
pub mod error;
pub mod handlers;
mod routes;
pub mod ws;

pub use auth::ApiKeys;
pub use error::ApiError;

use axum::http::{header, HeaderValue, Method};
use axum::middleware as axum_mw;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::hub::HubHandle;
use crate::race_guard::RaceGuard;
use crate::storage::RecordStore;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub hub: HubHandle,
    pub races: Arc<RaceGuard>,
    pub keys: Arc<ApiKeys>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(races: Arc<RaceGuard>, keys: ApiKeys, config: AppConfig) -> Self {
        Self {
            store: Arc::clone(races.store()),
            hub: races.hub().clone(),
            races,
            keys: Arc::new(keys),
            config: Arc::new(config),
        }
    }
}

/// Dashboards are served from another origin, so any origin is allowed unless
/// `SCOREAPP_CORS_ORIGINS` lists the permitted ones (comma-separated).
fn build_cors_layer() -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600));

    match std::env::var("SCOREAPP_CORS_ORIGINS") {
        Ok(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            cors.allow_origin(allowed)
        }
        Err(_) => cors.allow_origin(Any),
    }
}

/// Create the complete application router.
pub fn create_app(state: AppState) -> Router {
    let keys = Arc::clone(&state.keys);

    routes::api_routes(state)
        .layer(axum_mw::from_fn_with_state(keys, auth::require_post_key))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
