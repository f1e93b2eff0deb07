//! Barrier simulator for demos and dashboard development.
//!
//! Records a crossing stamped "now" every 5-8 s, alternating barriers 1 and
//! 2, through the same recording path as a connected barrier.

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::defaults::{
    SIMULATOR_JITTER_MS, SIMULATOR_MIN_GAP_MS, SIMULATOR_STARTUP_DELAY_MS,
};
use crate::race_guard::RaceGuard;
use crate::types::BarrierId;

/// Barrier identities the simulator alternates between
const SIMULATED_BARRIERS: [BarrierId; 2] = [1, 2];

fn next_gap(rng: &mut impl Rng) -> Duration {
    Duration::from_millis(SIMULATOR_MIN_GAP_MS + rng.gen_range(0..SIMULATOR_JITTER_MS))
}

/// Run until `cancel` fires
pub async fn run(races: Arc<RaceGuard>, cancel: CancellationToken) {
    info!("[Simulator] Task starting");

    let mut delay = Duration::from_millis(SIMULATOR_STARTUP_DELAY_MS);
    for barrier in SIMULATED_BARRIERS.iter().copied().cycle() {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        match races.record_crossing(barrier, Utc::now()).await {
            Ok(recorded) => match recorded.race {
                Some(race) => info!(barrier, race = race.id, "[Simulator] Crossing added"),
                None => info!(barrier, "[Simulator] No race running, crossing unassociated"),
            },
            Err(e) => warn!(barrier, "[Simulator] Could not record crossing: {}", e),
        }

        delay = next_gap(&mut rand::thread_rng());
    }

    info!("[Simulator] Stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_bounds() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let gap = next_gap(&mut rng).as_millis() as u64;
            assert!((5_000..8_000).contains(&gap));
        }
    }
}
