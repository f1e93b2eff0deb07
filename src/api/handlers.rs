//! REST handlers for teams, races and crossings.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use super::error::ApiError;
use super::AppState;
use crate::config::RacesConfig;
use crate::hub::HubStatus;
use crate::types::{
    Crossing, CrossingId, CrossingUpdate, Race, RaceDraft, RaceId, RaceState, RaceType, Team,
    TeamId,
};

type ApiResult<T> = Result<Json<T>, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

// ============================================================================
// Liveness / presence
// ============================================================================

/// GET /
pub async fn index() -> &'static str {
    "scoreapp is running"
}

/// GET /barriers
pub async fn barriers(State(state): State<AppState>) -> ApiResult<HubStatus> {
    Ok(Json(state.hub.status().await?))
}

// ============================================================================
// Teams
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TeamRequest {
    pub name: String,
}

impl TeamRequest {
    fn validated_name(&self) -> Result<&str, ApiError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ApiError::BadRequest("name must not be empty".to_string()));
        }
        Ok(name)
    }
}

/// GET /teams
pub async fn list_teams(State(state): State<AppState>) -> ApiResult<Vec<Team>> {
    Ok(Json(state.store.list_teams()?))
}

/// POST /teams
pub async fn create_team(
    State(state): State<AppState>,
    payload: Result<Json<TeamRequest>, JsonRejection>,
) -> ApiResult<Team> {
    let request = body(payload)?;
    let team = state.store.create_team(request.validated_name()?)?;
    tracing::info!(team = team.id, name = %team.name, "Team created");
    Ok(Json(team))
}

/// POST /teams/:id
pub async fn rename_team(
    State(state): State<AppState>,
    Path(id): Path<TeamId>,
    payload: Result<Json<TeamRequest>, JsonRejection>,
) -> ApiResult<Team> {
    let request = body(payload)?;
    Ok(Json(state.store.rename_team(id, request.validated_name()?)?))
}

// ============================================================================
// Races
// ============================================================================

/// Body of POST /races
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRaceRequest {
    #[serde(rename = "type")]
    pub race_type: Option<RaceType>,
    #[serde(default)]
    pub round: u32,
    pub team_a_id: Option<TeamId>,
    pub team_b_id: Option<TeamId>,
    /// Milliseconds
    pub time_duration: Option<u64>,
    pub laps_duration: Option<u32>,
}

impl CreateRaceRequest {
    /// Check field combinations and fill in per-type defaults.
    pub fn into_draft(self, defaults: &RacesConfig) -> Result<RaceDraft, ApiError> {
        let race_type = self
            .race_type
            .ok_or_else(|| ApiError::BadRequest("type not specified".to_string()))?;
        let team_a_id = self
            .team_a_id
            .filter(|&id| id != 0)
            .ok_or_else(|| ApiError::BadRequest("teamAId not specified".to_string()))?;

        match race_type {
            RaceType::TimeTrial => {
                if self.laps_duration.is_some() {
                    return Err(ApiError::BadRequest(
                        "lapsDuration must not be specified for time_trial race type".to_string(),
                    ));
                }
                if self.team_b_id.is_some() {
                    return Err(ApiError::BadRequest(
                        "teamBId must not be specified for time_trial race type".to_string(),
                    ));
                }
                Ok(RaceDraft {
                    race_type,
                    round: self.round,
                    team_a_id,
                    team_b_id: None,
                    time_duration_ms: Some(
                        self.time_duration
                            .unwrap_or(defaults.default_time_duration_ms),
                    ),
                    laps_duration: None,
                })
            }
            RaceType::HeadToHead => {
                if self.time_duration.is_some() {
                    return Err(ApiError::BadRequest(
                        "timeDuration must not be specified for head_to_head race type"
                            .to_string(),
                    ));
                }
                let team_b_id = self.team_b_id.filter(|&id| id != 0).ok_or_else(|| {
                    ApiError::BadRequest(
                        "teamBId not specified but required for head_to_head race type"
                            .to_string(),
                    )
                })?;
                Ok(RaceDraft {
                    race_type,
                    round: self.round,
                    team_a_id,
                    team_b_id: Some(team_b_id),
                    time_duration_ms: None,
                    laps_duration: Some(self.laps_duration.unwrap_or(defaults.default_laps)),
                })
            }
        }
    }
}

/// GET /races
pub async fn list_races(State(state): State<AppState>) -> ApiResult<Vec<Race>> {
    Ok(Json(state.store.list_races()?))
}

/// GET /races/finished
pub async fn list_finished_races(State(state): State<AppState>) -> ApiResult<Vec<Race>> {
    Ok(Json(state.store.list_races_in_state(RaceState::Finished)?))
}

/// GET /races/:id
pub async fn get_race(State(state): State<AppState>, Path(id): Path<RaceId>) -> ApiResult<Race> {
    state
        .store
        .load_full_race(id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("race with id {} not found", id)))
}

/// POST /races
pub async fn create_race(
    State(state): State<AppState>,
    payload: Result<Json<CreateRaceRequest>, JsonRejection>,
) -> ApiResult<Race> {
    let draft = body(payload)?.into_draft(&state.config.races)?;

    for team in std::iter::once(draft.team_a_id).chain(draft.team_b_id) {
        if state.store.get_team(team)?.is_none() {
            return Err(ApiError::BadRequest(format!("no team with id {}", team)));
        }
    }

    let race = state.store.create_race(draft)?;
    tracing::info!(race = race.id, race_type = %race.race_type, "Race created");
    Ok(Json(race))
}

async fn set_state(state: &AppState, id: RaceId, target: RaceState) -> ApiResult<Race> {
    Ok(Json(state.races.try_set_state(id, target).await?))
}

/// POST /races/:id/start
pub async fn start_race(State(state): State<AppState>, Path(id): Path<RaceId>) -> ApiResult<Race> {
    set_state(&state, id, RaceState::Running).await
}

/// POST /races/:id/stop
pub async fn stop_race(State(state): State<AppState>, Path(id): Path<RaceId>) -> ApiResult<Race> {
    set_state(&state, id, RaceState::Finished).await
}

/// POST /races/:id/cancel
pub async fn cancel_race(State(state): State<AppState>, Path(id): Path<RaceId>) -> ApiResult<Race> {
    set_state(&state, id, RaceState::Unfinished).await
}

// ============================================================================
// Crossings
// ============================================================================

/// POST /crossings/:id
///
/// Operator correction. The owning race, if any, is re-broadcast.
pub async fn update_crossing(
    State(state): State<AppState>,
    Path(id): Path<CrossingId>,
    payload: Result<Json<CrossingUpdate>, JsonRejection>,
) -> ApiResult<Crossing> {
    let update = body(payload)?;
    let crossing = state.store.update_crossing(id, update)?;
    tracing::info!(
        crossing = id,
        team = %crossing.team,
        ignored = crossing.ignored,
        "Crossing corrected"
    );

    if let Some(race_id) = crossing.race_id {
        if let Some(race) = state.store.load_full_race(race_id)? {
            state.races.broadcast_race(&race).await;
        }
    }
    Ok(Json(crossing))
}

/// GET /crossings/unassociated
pub async fn unassociated_crossings(State(state): State<AppState>) -> ApiResult<Vec<Crossing>> {
    Ok(Json(state.store.unassociated_crossings()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> RacesConfig {
        RacesConfig::default()
    }

    fn parse(json: &str) -> CreateRaceRequest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_time_trial_defaults_duration() {
        let draft = parse(r#"{"type": "time_trial", "round": 2, "teamAId": 1}"#)
            .into_draft(&defaults())
            .unwrap();
        assert_eq!(draft.time_duration_ms, Some(300_000));
        assert_eq!(draft.laps_duration, None);
        assert_eq!(draft.team_b_id, None);
        assert_eq!(draft.round, 2);
    }

    #[test]
    fn test_time_trial_rejects_laps() {
        let err = parse(r#"{"type": "time_trial", "teamAId": 1, "lapsDuration": 3}"#)
            .into_draft(&defaults())
            .unwrap_err();
        assert!(err.to_string().contains("lapsDuration"));
    }

    #[test]
    fn test_head_to_head_defaults_laps() {
        let draft = parse(r#"{"type": "head_to_head", "teamAId": 1, "teamBId": 2}"#)
            .into_draft(&defaults())
            .unwrap();
        assert_eq!(draft.laps_duration, Some(10));
        assert_eq!(draft.time_duration_ms, None);
        assert_eq!(draft.team_b_id, Some(2));
    }

    #[test]
    fn test_head_to_head_requires_team_b() {
        let err = parse(r#"{"type": "head_to_head", "teamAId": 1}"#)
            .into_draft(&defaults())
            .unwrap_err();
        assert!(err.to_string().contains("teamBId"));

        let err = parse(r#"{"type": "head_to_head", "teamAId": 1, "teamBId": 2, "timeDuration": 5}"#)
            .into_draft(&defaults())
            .unwrap_err();
        assert!(err.to_string().contains("timeDuration"));
    }

    #[test]
    fn test_missing_type_and_team() {
        let err = parse(r#"{"teamAId": 1}"#).into_draft(&defaults()).unwrap_err();
        assert_eq!(err.to_string(), "type not specified");

        let err = parse(r#"{"type": "time_trial", "teamAId": 0}"#)
            .into_draft(&defaults())
            .unwrap_err();
        assert_eq!(err.to_string(), "teamAId not specified");
    }
}
