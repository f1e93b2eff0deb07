//! Websocket endpoints: viewers on `/ws`, barriers on `/barrier/:id`.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use futures::StreamExt;
use tracing::warn;

use super::error::ApiError;
use super::AppState;
use crate::hub::BarrierSession;
use crate::sessions::barrier::{self, BarrierSettings};
use crate::sessions::viewer::{self, ViewerSettings};
use crate::types::BarrierId;

/// GET /ws
pub async fn viewer_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let settings = ViewerSettings::from(&state.config.viewer);
    let races = state.races.clone();

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        viewer::serve(sink, stream, races, settings).await;
    })
}

/// GET /barrier/:id
///
/// The identity is registered before the upgrade so a duplicate is refused
/// with 409 and never reaches the websocket stage. A request that cannot be
/// upgraded releases the identity again.
pub async fn barrier_ws(
    State(state): State<AppState>,
    Path(id): Path<BarrierId>,
    uri: Uri,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    if id == 0 {
        return Err(ApiError::BadRequest(
            "barrier id must be a positive integer".to_string(),
        ));
    }
    state.keys.check_barrier(uri.path(), &headers)?;

    if !state.hub.register_barrier(BarrierSession::new(id)).await? {
        return Err(ApiError::Conflict("barrier already connected".to_string()));
    }

    let Some(ws) = ws else {
        state.hub.unregister_barrier(id).await?;
        return Err(ApiError::BadRequest("websocket upgrade required".to_string()));
    };

    let settings = BarrierSettings::from(&state.config.barrier);
    let races = state.races.clone();
    let hub = state.hub.clone();

    let response = ws
        .max_message_size(settings.max_message_size)
        .on_failed_upgrade(move |e| {
            warn!(barrier = id, "Barrier upgrade failed: {}", e);
            tokio::spawn(async move {
                if let Err(e) = hub.unregister_barrier(id).await {
                    warn!(barrier = id, "Barrier unregister failed: {:#}", e);
                }
            });
        })
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            barrier::run(id, sink, stream, races, settings).await;
        });

    Ok(response)
}
