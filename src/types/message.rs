//! Outbound viewer messages
//!
//! Three kinds, distinguished by their single top-level key:
//! - `{"currentRace": {"id": ...} | null}`
//! - `{"barriers": [...]}`
//! - `{"race": {...}}`

use serde::{Deserialize, Serialize};

use super::{BarrierId, Race, RaceId};

/// Identity of the race currently running
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RaceRef {
    pub id: RaceId,
}

/// Message pushed to every viewer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ViewerMessage {
    CurrentRace(Option<RaceRef>),
    Barriers(Vec<BarrierId>),
    Race(Box<Race>),
}

impl ViewerMessage {
    pub fn current_race(id: Option<RaceId>) -> Self {
        ViewerMessage::CurrentRace(id.map(|id| RaceRef { id }))
    }

    pub fn race(race: Race) -> Self {
        ViewerMessage::Race(Box::new(race))
    }
}
