//! Live core scenarios
//!
//! Barrier and viewer sessions driven over in-memory `futures` channels
//! instead of websockets, against a real hub, race guard and temporary
//! sled store.

use scoreapp::hub::{self, BarrierSession, HubHandle, ViewerSession};
use scoreapp::sessions::barrier::{self, BarrierSettings};
use scoreapp::sessions::viewer::{self, ViewerSettings};
use scoreapp::storage::{RecordStore, SledStore, StoreError};
use scoreapp::types::{
    BarrierId, Crossing, CrossingId, CrossingUpdate, NewCrossing, Race, RaceDraft, RaceId,
    RaceState, RaceType, Team, TeamId,
};
use scoreapp::{Classifier, CrossingTeam, RaceGuard, TransitionError, ViewerMessage};

use axum::extract::ws::Message;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const T0_MICROS: i64 = 1_700_000_000_000_000;

struct Core {
    store: Arc<dyn RecordStore>,
    hub: HubHandle,
    races: Arc<RaceGuard>,
}

fn core() -> Core {
    core_with(Arc::new(SledStore::temporary().unwrap()))
}

fn core_with(store: Arc<dyn RecordStore>) -> Core {
    let hub = hub::spawn(64);
    let races = Arc::new(RaceGuard::new(
        Arc::clone(&store),
        hub.clone(),
        Classifier::default(),
    ));
    Core { store, hub, races }
}

impl Core {
    fn head_to_head(&self, round: u32) -> RaceId {
        let a = self.store.create_team(&format!("A{round}")).unwrap();
        let b = self.store.create_team(&format!("B{round}")).unwrap();
        self.store
            .create_race(RaceDraft {
                race_type: RaceType::HeadToHead,
                round,
                team_a_id: a.id,
                team_b_id: Some(b.id),
                time_duration_ms: None,
                laps_duration: Some(10),
            })
            .unwrap()
            .id
    }
}

/// Client side of an in-memory connection
struct Peer {
    to_server: UnboundedSender<Result<Message, Infallible>>,
    from_server: UnboundedReceiver<Message>,
}

type ServerSide = (
    UnboundedSender<Message>,
    UnboundedReceiver<Result<Message, Infallible>>,
);

fn connection() -> (Peer, ServerSide) {
    let (to_server, server_stream) = unbounded();
    let (server_sink, from_server) = unbounded();
    (
        Peer {
            to_server,
            from_server,
        },
        (server_sink, server_stream),
    )
}

impl Peer {
    fn send_text(&self, text: &str) {
        self.to_server
            .unbounded_send(Ok(Message::Text(text.to_string())))
            .unwrap();
    }

    fn send_timestamp(&self, offset_ms: i64) {
        self.send_text(&json!({ "timestamp": T0_MICROS + offset_ms * 1_000 }).to_string());
    }

    /// Next application message, skipping pings
    async fn next_json(&mut self) -> Value {
        loop {
            let frame = timeout(Duration::from_secs(2), self.from_server.next())
                .await
                .expect("timed out waiting for a message")
                .expect("connection closed");
            match frame {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) => continue,
                other => panic!("unexpected frame {other:?}"),
            }
        }
    }
}

/// Sled store whose first `failures` crossing appends fail
struct FailingStore {
    inner: SledStore,
    failures: AtomicUsize,
    failed: AtomicUsize,
}

impl FailingStore {
    fn new(failures: usize) -> Self {
        Self {
            inner: SledStore::temporary().unwrap(),
            failures: AtomicUsize::new(failures),
            failed: AtomicUsize::new(0),
        }
    }

    fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

impl RecordStore for FailingStore {
    fn find_running_race(&self) -> Result<Option<Race>, StoreError> {
        self.inner.find_running_race()
    }

    fn running_race_ids(&self) -> Result<Vec<RaceId>, StoreError> {
        self.inner.running_race_ids()
    }

    fn load_full_race(&self, id: RaceId) -> Result<Option<Race>, StoreError> {
        self.inner.load_full_race(id)
    }

    fn append_crossing(
        &self,
        race: Option<RaceId>,
        crossing: NewCrossing,
    ) -> Result<Crossing, StoreError> {
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Database("disk full".to_string()));
        }
        self.inner.append_crossing(race, crossing)
    }

    fn update_state(
        &self,
        id: RaceId,
        new_state: RaceState,
        expected: RaceState,
    ) -> Result<Race, StoreError> {
        self.inner.update_state(id, new_state, expected)
    }

    fn list_teams(&self) -> Result<Vec<Team>, StoreError> {
        self.inner.list_teams()
    }

    fn get_team(&self, id: TeamId) -> Result<Option<Team>, StoreError> {
        self.inner.get_team(id)
    }

    fn create_team(&self, name: &str) -> Result<Team, StoreError> {
        self.inner.create_team(name)
    }

    fn rename_team(&self, id: TeamId, name: &str) -> Result<Team, StoreError> {
        self.inner.rename_team(id, name)
    }

    fn create_race(&self, draft: RaceDraft) -> Result<Race, StoreError> {
        self.inner.create_race(draft)
    }

    fn list_races(&self) -> Result<Vec<Race>, StoreError> {
        self.inner.list_races()
    }

    fn list_races_in_state(&self, state: RaceState) -> Result<Vec<Race>, StoreError> {
        self.inner.list_races_in_state(state)
    }

    fn update_crossing(
        &self,
        id: CrossingId,
        update: CrossingUpdate,
    ) -> Result<Crossing, StoreError> {
        self.inner.update_crossing(id, update)
    }

    fn unassociated_crossings(&self) -> Result<Vec<Crossing>, StoreError> {
        self.inner.unassociated_crossings()
    }

    fn backend_name(&self) -> &'static str {
        "failing-sled"
    }
}

fn barrier_settings() -> BarrierSettings {
    BarrierSettings {
        ping_period: Duration::from_secs(30),
        pong_wait: Duration::from_secs(60),
        write_wait: Duration::from_secs(1),
        max_message_size: 512,
    }
}

fn viewer_settings(queue_capacity: usize) -> ViewerSettings {
    ViewerSettings {
        queue_capacity,
        ping_period: Duration::from_secs(30),
        write_wait: Duration::from_secs(1),
    }
}

/// Register `barrier` on the hub, as the HTTP layer does before upgrading,
/// then run its session in the background.
async fn spawn_barrier(
    core: &Core,
    barrier: BarrierId,
    settings: BarrierSettings,
) -> (Peer, JoinHandle<()>) {
    assert!(core
        .hub
        .register_barrier(BarrierSession::new(barrier))
        .await
        .unwrap());
    let (peer, (sink, stream)) = connection();
    let session = tokio::spawn(barrier::run(
        barrier,
        sink,
        stream,
        Arc::clone(&core.races),
        settings,
    ));
    (peer, session)
}

async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting until {what}");
}

async fn wait_for_barriers(hub: &HubHandle, expected: Vec<u32>) {
    for _ in 0..200 {
        if hub.status().await.unwrap().barriers == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("barriers never became {expected:?}");
}

// ============================================================================
// Barrier sessions
// ============================================================================

#[tokio::test]
async fn test_barrier_crossings_are_classified_and_persisted() {
    let core = core();
    let race_id = core.head_to_head(1);
    core.races
        .try_set_state(race_id, RaceState::Running)
        .await
        .unwrap();

    let (peer, session) = spawn_barrier(&core, 1, barrier_settings()).await;
    wait_for_barriers(&core.hub, vec![1]).await;

    peer.send_timestamp(0);
    // Decode faults are skipped, the session keeps reading
    peer.send_text("not json");
    peer.send_text(r#"{"timestamp": 0}"#);
    peer.send_text(r#"{"other": 12}"#);
    peer.send_timestamp(300);
    peer.send_timestamp(5_000);

    let store = Arc::clone(&core.store);
    wait_until("three crossings are stored", || {
        store.load_full_race(race_id).unwrap().unwrap().crossings.len() == 3
    })
    .await;

    let race = core.store.load_full_race(race_id).unwrap().unwrap();
    let got: Vec<_> = race
        .crossings
        .iter()
        .map(|c| (c.barrier_id, c.team, c.ignored))
        .collect();
    assert_eq!(
        got,
        vec![
            (1, CrossingTeam::TeamA, false),
            (1, CrossingTeam::TeamB, true),
            (1, CrossingTeam::TeamB, false),
        ]
    );
    assert_eq!(race.crossings[1].time.timestamp_micros(), T0_MICROS + 300_000);

    // Orderly close unregisters the barrier
    peer.to_server
        .unbounded_send(Ok(Message::Close(None)))
        .unwrap();
    timeout(Duration::from_secs(2), session).await.unwrap().unwrap();
    wait_for_barriers(&core.hub, vec![]).await;
}

#[tokio::test]
async fn test_duplicate_barrier_rejected_existing_kept() {
    let core = core();
    let (peer, session) = spawn_barrier(&core, 3, barrier_settings()).await;

    assert!(!core
        .hub
        .register_barrier(BarrierSession::new(3))
        .await
        .unwrap());
    assert_eq!(core.hub.status().await.unwrap().barriers, vec![3]);

    // The connected session is untouched and keeps recording
    peer.send_timestamp(0);
    let store = Arc::clone(&core.store);
    wait_until("the crossing is stored", || {
        store.unassociated_crossings().unwrap().len() == 1
    })
    .await;
    assert_eq!(core.store.unassociated_crossings().unwrap()[0].barrier_id, 3);

    drop(peer);
    timeout(Duration::from_secs(2), session).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_silent_barrier_dropped_after_pong_wait() {
    let core = core();
    let (peer, (sink, stream)) = connection();
    let settings = BarrierSettings {
        ping_period: Duration::from_millis(20),
        pong_wait: Duration::from_millis(100),
        ..barrier_settings()
    };

    assert!(core
        .hub
        .register_barrier(BarrierSession::new(5))
        .await
        .unwrap());

    // Events alone do not keep the link alive
    peer.send_timestamp(0);
    timeout(
        Duration::from_secs(2),
        barrier::run(5, sink, stream, Arc::clone(&core.races), settings),
    )
    .await
    .expect("session outlived its pong deadline");

    assert!(core.hub.status().await.unwrap().barriers.is_empty());
    drop(peer);
}

#[tokio::test]
async fn test_crossing_without_running_race_is_kept_unassociated() {
    let core = core();
    let (peer, session) = spawn_barrier(&core, 2, barrier_settings()).await;

    peer.send_timestamp(0);
    let store = Arc::clone(&core.store);
    wait_until("the crossing is stored", || {
        store.unassociated_crossings().unwrap().len() == 1
    })
    .await;

    let crossing = &core.store.unassociated_crossings().unwrap()[0];
    assert_eq!(crossing.barrier_id, 2);
    assert_eq!(crossing.team, CrossingTeam::None);
    assert_eq!(crossing.race_id, None);

    drop(peer);
    timeout(Duration::from_secs(2), session).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_store_fault_drops_one_crossing_session_survives() {
    let store = Arc::new(FailingStore::new(1));
    let core = core_with(store.clone());
    let race_id = core.head_to_head(1);
    core.races
        .try_set_state(race_id, RaceState::Running)
        .await
        .unwrap();

    let (viewer, mut queue) = ViewerSession::new(16);
    core.hub.register_viewer(viewer).await.unwrap();
    let (peer, session) = spawn_barrier(&core, 1, barrier_settings()).await;

    peer.send_timestamp(0);
    peer.send_timestamp(5_000);

    // The first race snapshot a viewer sees already holds only the second crossing
    let race = loop {
        let payload = timeout(Duration::from_secs(2), queue.recv())
            .await
            .expect("timed out waiting for a race")
            .expect("viewer queue closed");
        let msg: Value = serde_json::from_str(&payload).unwrap();
        if let Some(race) = msg.get("race") {
            break race.clone();
        }
    };
    assert_eq!(store.failed(), 1);
    assert_eq!(race["crossings"].as_array().unwrap().len(), 1);

    let stored = core.store.load_full_race(race_id).unwrap().unwrap();
    assert_eq!(stored.crossings.len(), 1);
    assert_eq!(stored.crossings[0].time.timestamp_micros(), T0_MICROS + 5_000_000);
    assert_eq!(core.hub.status().await.unwrap().barriers, vec![1]);

    drop(peer);
    timeout(Duration::from_secs(2), session).await.unwrap().unwrap();
}

// ============================================================================
// Viewer sessions
// ============================================================================

#[tokio::test]
async fn test_viewer_gets_snapshots_then_live_updates() {
    let core = core();
    let race_id = core.head_to_head(1);
    core.races
        .try_set_state(race_id, RaceState::Running)
        .await
        .unwrap();
    core.hub
        .register_barrier(BarrierSession::new(2))
        .await
        .unwrap();

    let (mut viewer_peer, (sink, stream)) = connection();
    let viewer_task = tokio::spawn(viewer::serve(
        sink,
        stream,
        Arc::clone(&core.races),
        viewer_settings(16),
    ));

    let mut snapshots = vec![viewer_peer.next_json().await, viewer_peer.next_json().await];
    snapshots.sort_by_key(|v| v.to_string());
    assert_eq!(
        snapshots,
        vec![json!({"barriers": [2]}), json!({"currentRace": {"id": race_id}})]
    );

    // Every crossing is followed by the full race with everything persisted so far
    let (barrier_peer, barrier_task) = spawn_barrier(&core, 1, barrier_settings()).await;
    assert_eq!(viewer_peer.next_json().await, json!({"barriers": [1, 2]}));

    for (n, offset) in [0, 2_000, 4_000].into_iter().enumerate() {
        barrier_peer.send_timestamp(offset);
        let msg = viewer_peer.next_json().await;
        let crossings = msg["race"]["crossings"].as_array().unwrap().clone();
        assert_eq!(crossings.len(), n + 1);

        let stored = core.store.load_full_race(race_id).unwrap().unwrap();
        let stored_ids: Vec<Value> = stored.crossings.iter().map(|c| json!(c.id)).collect();
        let sent_ids: Vec<Value> = crossings.iter().map(|c| c["id"].clone()).collect();
        assert_eq!(sent_ids, stored_ids);
    }

    // Stopping: current race identity first, then the race
    core.races
        .try_set_state(race_id, RaceState::Finished)
        .await
        .unwrap();
    assert_eq!(viewer_peer.next_json().await, json!({"currentRace": null}));
    assert_eq!(viewer_peer.next_json().await["race"]["state"], "finished");

    drop(barrier_peer);
    timeout(Duration::from_secs(2), barrier_task).await.unwrap().unwrap();
    assert_eq!(viewer_peer.next_json().await, json!({"barriers": [2]}));

    // Viewer hangs up: the session ends and is unregistered
    drop(viewer_peer);
    timeout(Duration::from_secs(2), viewer_task).await.unwrap().unwrap();
    assert_eq!(core.hub.status().await.unwrap().viewers, 0);
}

#[tokio::test]
async fn test_saturated_viewer_dropped_others_still_served() {
    let core = core();

    // Never drained: its queue fills after the registration snapshot
    let (stuck, _stuck_rx) = ViewerSession::new(1);
    core.hub.register_viewer(stuck).await.unwrap();

    let (mut healthy, (sink, stream)) = connection();
    tokio::spawn(viewer::serve(
        sink,
        stream,
        Arc::clone(&core.races),
        viewer_settings(16),
    ));
    healthy.next_json().await;
    healthy.next_json().await;
    assert_eq!(core.hub.status().await.unwrap().viewers, 2);

    core.hub
        .broadcast(&ViewerMessage::current_race(Some(9)))
        .await
        .unwrap();

    assert_eq!(healthy.next_json().await, json!({"currentRace": {"id": 9}}));
    assert_eq!(core.hub.status().await.unwrap().viewers, 1);
}

// ============================================================================
// Current-race guard
// ============================================================================

#[tokio::test]
async fn test_one_running_race_at_a_time() {
    let core = core();
    let r = core.head_to_head(1);
    let r2 = core.head_to_head(2);

    core.races.try_set_state(r, RaceState::Running).await.unwrap();

    let err = core
        .races
        .try_set_state(r2, RaceState::Running)
        .await
        .unwrap_err();
    assert!(matches!(err, TransitionError::AnotherRunning(id) if id == r));
    assert!(err.to_string().contains(&r.to_string()));
    assert_eq!(
        core.store.load_full_race(r).unwrap().unwrap().state,
        RaceState::Running
    );
    assert_eq!(
        core.store.load_full_race(r2).unwrap().unwrap().state,
        RaceState::BeforeStart
    );

    core.races.try_set_state(r, RaceState::Finished).await.unwrap();
    core.races.try_set_state(r2, RaceState::Running).await.unwrap();
    assert_eq!(core.races.current().await, Some(r2));
    assert_eq!(core.store.running_race_ids().unwrap(), vec![r2]);
}

#[tokio::test]
async fn test_concurrent_starts_admit_exactly_one() {
    let core = core();
    let ids: Vec<RaceId> = (1..=4).map(|round| core.head_to_head(round)).collect();

    let mut tasks = Vec::new();
    for id in ids {
        let races = Arc::clone(&core.races);
        tasks.push(tokio::spawn(async move {
            races.try_set_state(id, RaceState::Running).await.is_ok()
        }));
    }

    let mut started = 0;
    for task in tasks {
        if task.await.unwrap() {
            started += 1;
        }
    }
    assert_eq!(started, 1);
    assert_eq!(core.store.running_race_ids().unwrap().len(), 1);
}
