//! scoreapp: live timing core for barrier-timed races
//!
//! Barriers stream crossing timestamps over websockets; each crossing is
//! classified, persisted and pushed to every connected viewer.
//!
//! ## Architecture
//!
//! - **Hub**: single actor owning viewer/barrier membership and fan-out
//! - **Crossing Classifier**: team attribution and debounce, pure logic
//! - **Current-Race Guard**: at most one running race, serialized recording
//! - **Sessions**: per-connection barrier and viewer loops
//! - **Record Store**: sled-backed races, teams and crossings

pub mod api;
pub mod classifier;
pub mod config;
pub mod hub;
pub mod race_guard;
pub mod sessions;
pub mod simulator;
pub mod storage;
pub mod types;

pub use classifier::{Classification, Classifier};
pub use config::AppConfig;
pub use hub::{Hub, HubHandle};
pub use race_guard::{RaceGuard, TransitionError};
pub use storage::{RecordStore, SledStore, StoreError};
pub use types::{Crossing, CrossingTeam, Race, RaceState, RaceType, Team, ViewerMessage};
