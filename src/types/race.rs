//! Race / trial types: RaceType, RaceState, stored record and full snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Crossing, RaceId, Team, TeamId};

// ============================================================================
// Race Type
// ============================================================================

/// Kind of scored attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RaceType {
    /// One team against the clock
    TimeTrial,
    /// Two teams on the same track, crossings alternate between them
    HeadToHead,
}

impl std::fmt::Display for RaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaceType::TimeTrial => write!(f, "time_trial"),
            RaceType::HeadToHead => write!(f, "head_to_head"),
        }
    }
}

// ============================================================================
// Race State
// ============================================================================

/// Lifecycle state: `BeforeStart -> Running -> {Finished | Unfinished}`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RaceState {
    #[default]
    BeforeStart,
    Running,
    Finished,
    Unfinished,
}

impl RaceState {
    /// State a race must be in before it may move to `target`.
    ///
    /// `None` means `target` is not reachable through a transition at all.
    pub fn required_prior(target: RaceState) -> Option<RaceState> {
        match target {
            RaceState::Running => Some(RaceState::BeforeStart),
            RaceState::Finished | RaceState::Unfinished => Some(RaceState::Running),
            RaceState::BeforeStart => None,
        }
    }
}

impl std::fmt::Display for RaceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaceState::BeforeStart => write!(f, "before_start"),
            RaceState::Running => write!(f, "running"),
            RaceState::Finished => write!(f, "finished"),
            RaceState::Unfinished => write!(f, "unfinished"),
        }
    }
}

// ============================================================================
// Stored Record
// ============================================================================

/// Race as persisted by the record store (teams by id, crossings indexed separately)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RaceRecord {
    pub id: RaceId,
    pub race_type: RaceType,
    pub state: RaceState,
    pub round: u32,
    pub team_a_id: TeamId,
    /// Present iff `race_type` is head-to-head
    pub team_b_id: Option<TeamId>,
    /// Time-trial only, milliseconds
    pub time_duration_ms: Option<u64>,
    /// Head-to-head only
    pub laps_duration: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for creating a race
#[derive(Debug, Clone, PartialEq)]
pub struct RaceDraft {
    pub race_type: RaceType,
    pub round: u32,
    pub team_a_id: TeamId,
    pub team_b_id: Option<TeamId>,
    pub time_duration_ms: Option<u64>,
    pub laps_duration: Option<u32>,
}

// ============================================================================
// Full Snapshot
// ============================================================================

/// Full race snapshot with teams and all crossings in arrival order.
///
/// This is the shape pushed to viewers as `{"race": ...}` and returned by the
/// race endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Race {
    pub id: RaceId,
    #[serde(rename = "type")]
    pub race_type: RaceType,
    pub state: RaceState,
    pub round: u32,
    pub team_a_id: TeamId,
    pub team_a: Team,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_b_id: Option<TeamId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_b: Option<Team>,
    /// Milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub laps_duration: Option<u32>,
    pub updated_at: DateTime<Utc>,
    pub crossings: Vec<Crossing>,
}

impl Race {
    /// Assemble a snapshot from its stored parts
    pub fn assemble(
        record: RaceRecord,
        team_a: Team,
        team_b: Option<Team>,
        crossings: Vec<Crossing>,
    ) -> Self {
        Self {
            id: record.id,
            race_type: record.race_type,
            state: record.state,
            round: record.round,
            team_a_id: record.team_a_id,
            team_a,
            team_b_id: record.team_b_id,
            team_b,
            time_duration: record.time_duration_ms,
            laps_duration: record.laps_duration,
            updated_at: record.updated_at,
            crossings,
        }
    }
}
