//! Current-Race Guard
//!
//! Enforces "at most one race is `Running`" and caches which one. The record
//! store stays the source of truth: every transition re-reads the race under
//! the lock before committing a compare-and-swap.
//!
//! Crossing recording takes the same lock, so a crossing can never be
//! appended to a race that is concurrently being stopped. Every broadcast is
//! queued on the hub while the lock is still held, so viewers receive
//! snapshots in commit order.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::classifier::{Classification, Classifier};
use crate::hub::{HubHandle, ViewerId};
use crate::storage::{RecordStore, StoreError};
use crate::types::{BarrierId, Crossing, Race, RaceId, RaceState, ViewerMessage};

/// Rejected state transitions
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("race with id {0} not found")]
    NotFound(RaceId),
    #[error("race with id {0} is already running")]
    AnotherRunning(RaceId),
    #[error("cannot move a race to state '{0}'")]
    UnsupportedTarget(RaceState),
    #[error("state should be '{expected}', not '{actual}'")]
    WrongState {
        expected: RaceState,
        actual: RaceState,
    },
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for TransitionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RaceNotFound(id) => TransitionError::NotFound(id),
            StoreError::Conflict { expected, actual } => {
                TransitionError::WrongState { expected, actual }
            }
            other => TransitionError::Store(other),
        }
    }
}

/// Result of recording one barrier crossing
#[derive(Debug, Clone)]
pub struct Recorded {
    pub crossing: Crossing,
    /// Snapshot after the append; `None` for an unassociated crossing
    pub race: Option<Race>,
}

pub struct RaceGuard {
    current: Mutex<Option<RaceId>>,
    store: Arc<dyn RecordStore>,
    hub: HubHandle,
    classifier: Classifier,
}

impl RaceGuard {
    pub fn new(store: Arc<dyn RecordStore>, hub: HubHandle, classifier: Classifier) -> Self {
        Self {
            current: Mutex::new(None),
            store,
            hub,
            classifier,
        }
    }

    /// Seed the cache from the store at startup
    pub async fn restore(&self) -> Result<Option<RaceId>, StoreError> {
        let mut current = self.current.lock().await;

        let running = self.store.running_race_ids()?;
        if running.len() > 1 {
            warn!(races = ?running, "More than one race found running");
        }

        *current = self.store.find_running_race()?.map(|race| race.id);
        if let Some(id) = *current {
            info!(race = id, "Restored running race");
        }
        Ok(*current)
    }

    /// Identity of the race currently running, if any
    pub async fn current(&self) -> Option<RaceId> {
        *self.current.lock().await
    }

    /// Move `race_id` to `target`.
    ///
    /// `Running` requires `BeforeStart` and no other running race;
    /// `Finished`/`Unfinished` require `Running`. A rejected transition
    /// changes nothing. On success viewers get the current-race identity,
    /// then the full race.
    pub async fn try_set_state(
        &self,
        race_id: RaceId,
        target: RaceState,
    ) -> Result<Race, TransitionError> {
        let mut current = self.current.lock().await;

        let stored = self
            .store
            .load_full_race(race_id)?
            .ok_or(TransitionError::NotFound(race_id))?;

        let expected = RaceState::required_prior(target)
            .ok_or(TransitionError::UnsupportedTarget(target))?;

        if target == RaceState::Running {
            if let Some(running) = *current {
                if running != race_id {
                    return Err(TransitionError::AnotherRunning(running));
                }
            }
        }

        if stored.state != expected {
            return Err(TransitionError::WrongState {
                expected,
                actual: stored.state,
            });
        }

        let race = self.store.update_state(race_id, target, expected)?;
        *current = (target == RaceState::Running).then_some(race_id);
        info!(race = race_id, state = %target, "Race state changed");

        // Queued before the lock drops so viewers see commits in order
        if let Err(e) = self.hub.broadcast(&ViewerMessage::current_race(*current)).await {
            warn!(race = race_id, "Current race broadcast failed: {:#}", e);
        }
        self.broadcast_race(&race).await;

        Ok(race)
    }

    /// Classify and persist one crossing from `barrier`, then broadcast the
    /// owning race. With no running race the crossing is kept unassociated.
    ///
    /// A store failure is returned and nothing is broadcast.
    pub async fn record_crossing(
        &self,
        barrier: BarrierId,
        time: DateTime<Utc>,
    ) -> Result<Recorded, StoreError> {
        let _current = self.current.lock().await;

        let recorded = match self.store.find_running_race()? {
            Some(race) => {
                let classification =
                    self.classifier
                        .classify(race.race_type, barrier, time, &race.crossings);
                let crossing = self.store.append_crossing(
                    Some(race.id),
                    classification.into_crossing(barrier, time),
                )?;
                let race = self.store.load_full_race(race.id)?;
                Recorded { crossing, race }
            }
            None => {
                let crossing = self.store.append_crossing(
                    None,
                    Classification::UNASSOCIATED.into_crossing(barrier, time),
                )?;
                warn!(
                    barrier,
                    crossing = crossing.id,
                    "No running race, crossing stored unassociated"
                );
                Recorded {
                    crossing,
                    race: None,
                }
            }
        };

        debug!(
            barrier,
            crossing = recorded.crossing.id,
            team = %recorded.crossing.team,
            ignored = recorded.crossing.ignored,
            "Crossing recorded"
        );

        if let Some(race) = &recorded.race {
            self.broadcast_race(race).await;
        }
        Ok(recorded)
    }

    /// Queue the current-race identity for one viewer.
    ///
    /// Queued under the lock, like every transition broadcast, so it cannot
    /// overtake or trail a concurrent transition out of order.
    pub async fn announce_current(&self, viewer: ViewerId) -> anyhow::Result<()> {
        let current = self.current.lock().await;
        self.hub
            .send_to(viewer, &ViewerMessage::current_race(*current))
            .await
    }

    /// Push the full race to every viewer; failures are logged only
    pub async fn broadcast_race(&self, race: &Race) {
        if let Err(e) = self.hub.broadcast(&ViewerMessage::race(race.clone())).await {
            warn!(race = race.id, "Race broadcast failed: {:#}", e);
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }
}
