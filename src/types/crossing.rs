//! Crossing types: one timestamped detection from a barrier

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BarrierId, CrossingId, RaceId};

/// Team a crossing is attributed to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CrossingTeam {
    #[default]
    None,
    TeamA,
    TeamB,
}

impl CrossingTeam {
    /// The other team of a head-to-head pair. `None` has no opposite.
    pub fn opposite(self) -> Option<CrossingTeam> {
        match self {
            CrossingTeam::TeamA => Some(CrossingTeam::TeamB),
            CrossingTeam::TeamB => Some(CrossingTeam::TeamA),
            CrossingTeam::None => None,
        }
    }
}

impl std::fmt::Display for CrossingTeam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CrossingTeam::None => write!(f, "none"),
            CrossingTeam::TeamA => write!(f, "teamA"),
            CrossingTeam::TeamB => write!(f, "teamB"),
        }
    }
}

/// A persisted crossing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Crossing {
    pub id: CrossingId,
    pub updated_at: DateTime<Utc>,
    /// Barrier wall-clock time of the detection
    pub time: DateTime<Utc>,
    pub ignored: bool,
    pub barrier_id: BarrierId,
    pub team: CrossingTeam,
    /// `None` when no race was running at arrival
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub race_id: Option<RaceId>,
}

/// A classified crossing ready to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewCrossing {
    pub time: DateTime<Utc>,
    pub barrier_id: BarrierId,
    pub ignored: bool,
    pub team: CrossingTeam,
}

/// Operator correction of a crossing
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrossingUpdate {
    pub ignored: bool,
    pub team: CrossingTeam,
}
