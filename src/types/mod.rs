//! Shared data structures for the live timing core
//!
//! - Race / trial: type, lifecycle state, stored record and full snapshot
//! - Crossing: one timestamped barrier detection, its team and debounce flag
//! - Team
//! - ViewerMessage: the three outbound viewer message kinds

mod crossing;
mod message;
mod race;

pub use crossing::*;
pub use message::*;
pub use race::*;

use serde::{Deserialize, Serialize};

pub type RaceId = u64;
pub type TeamId = u64;
pub type CrossingId = u64;

/// Human-assigned identity of a physical barrier unit (small positive integer)
pub type BarrierId = u32;

/// A competing team
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
}
