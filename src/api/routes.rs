//! API route table.

use axum::routing::{get, post};
use axum::Router;

use super::{handlers, ws, AppState};

/// Build the API router.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        // Live connections
        .route("/ws", get(ws::viewer_ws))
        .route("/barrier/:id", get(ws::barrier_ws))
        .route("/barriers", get(handlers::barriers))
        // Teams
        .route("/teams", get(handlers::list_teams))
        .route("/teams", post(handlers::create_team))
        .route("/teams/:id", post(handlers::rename_team))
        // Races (finished before parameterized route to avoid capture)
        .route("/races", get(handlers::list_races))
        .route("/races", post(handlers::create_race))
        .route("/races/finished", get(handlers::list_finished_races))
        .route("/races/:id", get(handlers::get_race))
        .route("/races/:id/start", post(handlers::start_race))
        .route("/races/:id/stop", post(handlers::stop_race))
        .route("/races/:id/cancel", post(handlers::cancel_race))
        // Crossings
        .route("/crossings/unassociated", get(handlers::unassociated_crossings))
        .route("/crossings/:id", post(handlers::update_crossing))
        .with_state(state)
}
