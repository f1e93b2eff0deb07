//! Sled-backed record store
//!
//! Named trees:
//! - `teams`: team id -> JSON [`Team`]
//! - `races`: race id -> JSON [`RaceRecord`]
//! - `crossings`: crossing id -> JSON [`Crossing`]
//! - `race_crossings`: race id ++ crossing id -> empty (arrival-order index)
//!
//! Ids come from `Db::generate_id`, which is monotonic, so big-endian id keys
//! iterate in creation order and the `race_crossings` prefix scan yields a
//! race's crossings in arrival order.

use chrono::Utc;
use sled::{Db, Tree};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{RecordStore, StoreError};
use crate::types::{
    Crossing, CrossingId, CrossingUpdate, NewCrossing, Race, RaceDraft, RaceId,
    RaceRecord, RaceState, Team, TeamId,
};

/// Record store backed by an embedded sled database
pub struct SledStore {
    db: Db,
    teams: Tree,
    races: Tree,
    crossings: Tree,
    race_crossings: Tree,
    /// Serializes multi-step writes (id allocation + index + race bump)
    write_lock: Mutex<()>,
}

impl SledStore {
    /// Open or create the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        tracing::debug!("Opening record store at {:?}", path);
        Self::from_db(db)
    }

    /// In-memory store removed on drop, for tests and dry runs
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        Ok(Self {
            teams: db.open_tree("teams")?,
            races: db.open_tree("races")?,
            crossings: db.open_tree("crossings")?,
            race_crossings: db.open_tree("race_crossings")?,
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| {
            tracing::warn!("Record store write lock poisoned, recovering");
            e.into_inner()
        })
    }

    fn next_id(&self) -> Result<u64, StoreError> {
        // generate_id starts at 0; ids are kept positive
        Ok(self.db.generate_id()? + 1)
    }

    fn get_record(&self, id: RaceId) -> Result<Option<RaceRecord>, StoreError> {
        match self.races.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_record(&self, record: &RaceRecord) -> Result<(), StoreError> {
        self.races
            .insert(record.id.to_be_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    fn get_crossing(&self, id: CrossingId) -> Result<Option<Crossing>, StoreError> {
        match self.crossings.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_crossing(&self, crossing: &Crossing) -> Result<(), StoreError> {
        self.crossings
            .insert(crossing.id.to_be_bytes(), serde_json::to_vec(crossing)?)?;
        Ok(())
    }

    fn touch_race(&self, id: RaceId) -> Result<(), StoreError> {
        let mut record = self.get_record(id)?.ok_or(StoreError::RaceNotFound(id))?;
        record.updated_at = Utc::now();
        self.put_record(&record)
    }

    fn crossings_of(&self, race: RaceId) -> Result<Vec<Crossing>, StoreError> {
        let mut crossings = Vec::new();
        for item in self.race_crossings.scan_prefix(race.to_be_bytes()) {
            let (key, _) = item?;
            let Some(id) = key.get(8..16).and_then(|b| <[u8; 8]>::try_from(b).ok()) else {
                tracing::warn!(race, "Malformed race_crossings key skipped");
                continue;
            };
            let id = u64::from_be_bytes(id);
            match self.get_crossing(id)? {
                Some(crossing) => crossings.push(crossing),
                None => tracing::warn!(race, crossing = id, "Indexed crossing missing"),
            }
        }
        Ok(crossings)
    }

    fn require_team(&self, id: TeamId) -> Result<Team, StoreError> {
        self.get_team(id)?.ok_or(StoreError::TeamNotFound(id))
    }

    fn assemble(&self, record: RaceRecord) -> Result<Race, StoreError> {
        let team_a = self.require_team(record.team_a_id)?;
        let team_b = match record.team_b_id {
            Some(id) => Some(self.require_team(id)?),
            None => None,
        };
        let crossings = self.crossings_of(record.id)?;
        Ok(Race::assemble(record, team_a, team_b, crossings))
    }

    fn records(&self) -> impl DoubleEndedIterator<Item = Result<RaceRecord, StoreError>> + '_ {
        self.races.iter().map(|item| -> Result<RaceRecord, StoreError> {
            let (_, bytes) = item?;
            Ok(serde_json::from_slice(&bytes)?)
        })
    }
}

fn crossing_index_key(race: RaceId, crossing: CrossingId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&race.to_be_bytes());
    key[8..].copy_from_slice(&crossing.to_be_bytes());
    key
}

impl RecordStore for SledStore {
    fn find_running_race(&self) -> Result<Option<Race>, StoreError> {
        for record in self.records().rev() {
            let record = record?;
            if record.state == RaceState::Running {
                return self.assemble(record).map(Some);
            }
        }
        Ok(None)
    }

    fn running_race_ids(&self) -> Result<Vec<RaceId>, StoreError> {
        let mut ids = Vec::new();
        for record in self.records() {
            let record = record?;
            if record.state == RaceState::Running {
                ids.push(record.id);
            }
        }
        Ok(ids)
    }

    fn load_full_race(&self, id: RaceId) -> Result<Option<Race>, StoreError> {
        match self.get_record(id)? {
            Some(record) => self.assemble(record).map(Some),
            None => Ok(None),
        }
    }

    fn append_crossing(
        &self,
        race: Option<RaceId>,
        crossing: NewCrossing,
    ) -> Result<Crossing, StoreError> {
        let _guard = self.lock();

        if let Some(race_id) = race {
            if self.get_record(race_id)?.is_none() {
                return Err(StoreError::RaceNotFound(race_id));
            }
        }

        let stored = Crossing {
            id: self.next_id()?,
            updated_at: Utc::now(),
            time: crossing.time,
            ignored: crossing.ignored,
            barrier_id: crossing.barrier_id,
            team: crossing.team,
            race_id: race,
        };
        self.put_crossing(&stored)?;

        if let Some(race_id) = race {
            self.race_crossings
                .insert(crossing_index_key(race_id, stored.id), Vec::<u8>::new())?;
            self.touch_race(race_id)?;
        }

        tracing::debug!(
            crossing = stored.id,
            race = ?race,
            barrier = stored.barrier_id,
            team = %stored.team,
            ignored = stored.ignored,
            "Stored crossing"
        );

        Ok(stored)
    }

    fn update_state(
        &self,
        id: RaceId,
        new_state: RaceState,
        expected: RaceState,
    ) -> Result<Race, StoreError> {
        let _guard = self.lock();
        let key = id.to_be_bytes();

        let old = self.races.get(key)?.ok_or(StoreError::RaceNotFound(id))?;
        let mut record: RaceRecord = serde_json::from_slice(&old)?;
        if record.state != expected {
            return Err(StoreError::Conflict {
                expected,
                actual: record.state,
            });
        }

        record.state = new_state;
        record.updated_at = Utc::now();
        let new = serde_json::to_vec(&record)?;

        if self
            .races
            .compare_and_swap(key, Some(old), Some(new))?
            .is_err()
        {
            let actual = self
                .get_record(id)?
                .map_or(expected, |current| current.state);
            return Err(StoreError::Conflict { expected, actual });
        }
        self.db.flush()?;

        self.assemble(record)
    }

    fn list_teams(&self) -> Result<Vec<Team>, StoreError> {
        self.teams
            .iter()
            .map(|item| -> Result<Team, StoreError> {
                let (_, bytes) = item?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect()
    }

    fn get_team(&self, id: TeamId) -> Result<Option<Team>, StoreError> {
        match self.teams.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn create_team(&self, name: &str) -> Result<Team, StoreError> {
        let _guard = self.lock();

        if self.list_teams()?.iter().any(|t| t.name == name) {
            return Err(StoreError::DuplicateTeam(name.to_string()));
        }

        let team = Team {
            id: self.next_id()?,
            name: name.to_string(),
        };
        self.teams
            .insert(team.id.to_be_bytes(), serde_json::to_vec(&team)?)?;
        Ok(team)
    }

    fn rename_team(&self, id: TeamId, name: &str) -> Result<Team, StoreError> {
        let _guard = self.lock();

        let mut team = self.require_team(id)?;
        if self
            .list_teams()?
            .iter()
            .any(|t| t.id != id && t.name == name)
        {
            return Err(StoreError::DuplicateTeam(name.to_string()));
        }

        team.name = name.to_string();
        self.teams
            .insert(team.id.to_be_bytes(), serde_json::to_vec(&team)?)?;
        Ok(team)
    }

    fn create_race(&self, draft: RaceDraft) -> Result<Race, StoreError> {
        let _guard = self.lock();

        self.require_team(draft.team_a_id)?;
        if let Some(team_b) = draft.team_b_id {
            self.require_team(team_b)?;
        }

        let now = Utc::now();
        let record = RaceRecord {
            id: self.next_id()?,
            race_type: draft.race_type,
            state: RaceState::BeforeStart,
            round: draft.round,
            team_a_id: draft.team_a_id,
            team_b_id: draft.team_b_id,
            time_duration_ms: draft.time_duration_ms,
            laps_duration: draft.laps_duration,
            created_at: now,
            updated_at: now,
        };
        self.put_record(&record)?;
        self.assemble(record)
    }

    fn list_races(&self) -> Result<Vec<Race>, StoreError> {
        self.records()
            .map(|record| self.assemble(record?))
            .collect()
    }

    fn list_races_in_state(&self, state: RaceState) -> Result<Vec<Race>, StoreError> {
        let mut races = Vec::new();
        for record in self.records() {
            let record = record?;
            if record.state == state {
                races.push(self.assemble(record)?);
            }
        }
        Ok(races)
    }

    fn update_crossing(
        &self,
        id: CrossingId,
        update: CrossingUpdate,
    ) -> Result<Crossing, StoreError> {
        let _guard = self.lock();

        let mut crossing = self
            .get_crossing(id)?
            .ok_or(StoreError::CrossingNotFound(id))?;
        crossing.ignored = update.ignored;
        crossing.team = update.team;
        crossing.updated_at = Utc::now();
        self.put_crossing(&crossing)?;

        if let Some(race_id) = crossing.race_id {
            self.touch_race(race_id)?;
        }
        Ok(crossing)
    }

    fn unassociated_crossings(&self) -> Result<Vec<Crossing>, StoreError> {
        let mut out = Vec::new();
        for item in self.crossings.iter() {
            let (_, bytes) = item?;
            let crossing: Crossing = serde_json::from_slice(&bytes)?;
            if crossing.race_id.is_none() {
                out.push(crossing);
            }
        }
        Ok(out)
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}
