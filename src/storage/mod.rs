//! Record Store
//!
//! The live core reads and writes races, teams and crossings only through the
//! [`RecordStore`] trait, so the backend can be swapped without touching the
//! sessions or the race guard:
//! - [`SledStore`]: sled-backed store used by the service (and, opened
//!   temporary, by the tests)
//!
//! All calls are synchronous and transactional at single-race granularity.

mod sled_store;

pub use sled_store::SledStore;

use crate::types::{
    Crossing, CrossingId, CrossingUpdate, NewCrossing, Race, RaceDraft, RaceId, RaceState, Team,
    TeamId,
};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("race with id {0} not found")]
    RaceNotFound(RaceId),
    #[error("team with id {0} not found")]
    TeamNotFound(TeamId),
    #[error("crossing with id {0} not found")]
    CrossingNotFound(CrossingId),
    #[error("team name '{0}' is already taken")]
    DuplicateTeam(String),
    #[error("state should be '{expected}', not '{actual}'")]
    Conflict {
        expected: RaceState,
        actual: RaceState,
    },
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Pluggable persistence backend.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across session tasks.
pub trait RecordStore: Send + Sync {
    // ------------------------------------------------------------------
    // Live core
    // ------------------------------------------------------------------

    /// Most recently created race in `Running` state, with teams and crossings
    fn find_running_race(&self) -> Result<Option<Race>, StoreError>;

    /// Every race currently in `Running` state (normally zero or one)
    fn running_race_ids(&self) -> Result<Vec<RaceId>, StoreError>;

    /// Race with teams and all crossings in arrival order
    fn load_full_race(&self, id: RaceId) -> Result<Option<Race>, StoreError>;

    /// Append a crossing to `race`, or store it unassociated when `race` is `None`.
    ///
    /// Appending to a race also bumps its `updated_at`.
    fn append_crossing(
        &self,
        race: Option<RaceId>,
        crossing: NewCrossing,
    ) -> Result<Crossing, StoreError>;

    /// Move `id` to `new_state` only if it is currently in `expected`.
    ///
    /// Fails with [`StoreError::Conflict`] and changes nothing otherwise.
    fn update_state(
        &self,
        id: RaceId,
        new_state: RaceState,
        expected: RaceState,
    ) -> Result<Race, StoreError>;

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn list_teams(&self) -> Result<Vec<Team>, StoreError>;

    fn get_team(&self, id: TeamId) -> Result<Option<Team>, StoreError>;

    /// Team names are unique
    fn create_team(&self, name: &str) -> Result<Team, StoreError>;

    fn rename_team(&self, id: TeamId, name: &str) -> Result<Team, StoreError>;

    /// New race, always in `BeforeStart`
    fn create_race(&self, draft: RaceDraft) -> Result<Race, StoreError>;

    fn list_races(&self) -> Result<Vec<Race>, StoreError>;

    fn list_races_in_state(&self, state: RaceState) -> Result<Vec<Race>, StoreError>;

    /// Operator correction of `ignored`/team. Bumps the owning race's `updated_at`.
    fn update_crossing(
        &self,
        id: CrossingId,
        update: CrossingUpdate,
    ) -> Result<Crossing, StoreError>;

    /// Crossings recorded while no race was running, oldest first
    fn unassociated_crossings(&self) -> Result<Vec<Crossing>, StoreError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}
