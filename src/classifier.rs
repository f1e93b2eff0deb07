//! Crossing Classifier
//!
//! Decides team attribution and debouncing for one raw crossing against the
//! race it arrived in. Pure decision logic, no I/O.
//!
//! ## Rules
//!
//! - **Time trial**: attribution is always `None`, nothing is debounced.
//! - **Head-to-head**:
//!   - The first crossing of the race is attributed by barrier identity:
//!     barrier 2 starts with team B, any other barrier with team A.
//!   - Every later crossing gets the opposite team of the most recent
//!     non-ignored crossing of the race, across both barriers.
//!   - If exactly one non-ignored crossing precedes the new one and the two
//!     are within the debounce window, the new crossing is marked ignored.
//!     It still receives a team by the alternation rule, but ignored
//!     crossings never count as "previous" for later decisions.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::defaults::DEBOUNCE_WINDOW_MS;
use crate::types::{BarrierId, Crossing, CrossingTeam, NewCrossing, RaceType};

/// Outcome of classifying one crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub team: CrossingTeam,
    pub ignored: bool,
}

impl Classification {
    /// Classification of a crossing that arrived with no running race
    pub const UNASSOCIATED: Classification = Classification {
        team: CrossingTeam::None,
        ignored: false,
    };

    /// Build the crossing to append
    pub fn into_crossing(self, barrier_id: BarrierId, time: DateTime<Utc>) -> NewCrossing {
        NewCrossing {
            time,
            barrier_id,
            ignored: self.ignored,
            team: self.team,
        }
    }
}

/// Classifier parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classifier {
    debounce: Duration,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEBOUNCE_WINDOW_MS))
    }
}

impl Classifier {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Classify a crossing from `barrier` at `time`.
    ///
    /// `prior` is every crossing already recorded for the race, in arrival
    /// order. Ignored crossings in it are skipped.
    pub fn classify(
        &self,
        race_type: RaceType,
        barrier: BarrierId,
        time: DateTime<Utc>,
        prior: &[Crossing],
    ) -> Classification {
        if race_type == RaceType::TimeTrial {
            return Classification {
                team: CrossingTeam::None,
                ignored: false,
            };
        }

        let mut counted = prior.iter().filter(|c| !c.ignored);
        let first = counted.next();
        let only_one = first.is_some() && counted.next().is_none();
        let previous = prior.iter().rev().find(|c| !c.ignored);

        let team = previous
            .and_then(|c| c.team.opposite())
            .unwrap_or_else(|| bootstrap_team(barrier));

        let ignored = match first {
            Some(first) if only_one => self.within_window(first.time, time),
            _ => false,
        };

        Classification { team, ignored }
    }

    /// Arrival order is not time order, so the gap is taken in either direction.
    fn within_window(&self, earlier: DateTime<Utc>, later: DateTime<Utc>) -> bool {
        let gap = later.signed_duration_since(earlier).abs();
        match gap.to_std() {
            Ok(gap) => gap <= self.debounce,
            Err(_) => false,
        }
    }
}

/// Team of the very first crossing of a head-to-head race
fn bootstrap_team(barrier: BarrierId) -> CrossingTeam {
    if barrier == 2 {
        CrossingTeam::TeamB
    } else {
        CrossingTeam::TeamA
    }
}
