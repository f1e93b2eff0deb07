//! Hub Actor - single owner of viewer/barrier membership and fan-out
//!
//! Every register/unregister/broadcast request goes through one command
//! queue and is processed one at a time, so membership snapshots and
//! broadcasts always reflect the state at their processing instant.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::types::{BarrierId, ViewerMessage};

/// Serialized viewer message, shared between all viewer queues
pub type Payload = Arc<str>;

pub type ViewerId = u64;

static NEXT_VIEWER_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Sessions as seen by the hub
// ============================================================================

/// Registration record of a viewer: its identity and the sending half of its
/// outbound queue. The hub holds the only sender, so dropping it closes the
/// queue and ends the viewer's write loop.
#[derive(Debug)]
pub struct ViewerSession {
    id: ViewerId,
    queue: mpsc::Sender<Payload>,
}

impl ViewerSession {
    /// New session with a bounded queue; the receiver goes to the write loop
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (queue, rx) = mpsc::channel(capacity);
        let id = NEXT_VIEWER_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, queue }, rx)
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }
}

/// Registration record of a connected barrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierSession {
    pub id: BarrierId,
    pub connected_at: DateTime<Utc>,
}

impl BarrierSession {
    pub fn new(id: BarrierId) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
        }
    }
}

/// Membership summary
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HubStatus {
    pub barriers: Vec<BarrierId>,
    pub viewers: usize,
}

// ============================================================================
// Commands
// ============================================================================

/// Commands for the Hub
#[derive(Debug)]
pub enum HubCommand {
    RegisterViewer(ViewerSession),
    UnregisterViewer(ViewerId),
    RegisterBarrier {
        session: BarrierSession,
        response_tx: oneshot::Sender<bool>,
    },
    UnregisterBarrier(BarrierId),
    /// Deliver to every viewer
    Broadcast(Payload),
    /// Deliver to a single viewer
    SendTo { viewer: ViewerId, payload: Payload },
    Status {
        response_tx: oneshot::Sender<HubStatus>,
    },
}

// ============================================================================
// Actor Handle
// ============================================================================

/// Handle to interact with the Hub
#[derive(Clone, Debug)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn register_viewer(&self, session: ViewerSession) -> Result<()> {
        self.send(HubCommand::RegisterViewer(session)).await
    }

    pub async fn unregister_viewer(&self, viewer: ViewerId) -> Result<()> {
        self.send(HubCommand::UnregisterViewer(viewer)).await
    }

    /// Returns `false` if the identity is already registered; nothing changes then.
    pub async fn register_barrier(&self, session: BarrierSession) -> Result<bool> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(HubCommand::RegisterBarrier {
            session,
            response_tx,
        })
        .await?;
        response_rx.await.context("Response channel closed")
    }

    pub async fn unregister_barrier(&self, barrier: BarrierId) -> Result<()> {
        self.send(HubCommand::UnregisterBarrier(barrier)).await
    }

    /// Serialize `message` once and deliver it to every viewer
    pub async fn broadcast(&self, message: &ViewerMessage) -> Result<()> {
        let payload = encode(message)?;
        self.send(HubCommand::Broadcast(payload)).await
    }

    pub async fn send_to(&self, viewer: ViewerId, message: &ViewerMessage) -> Result<()> {
        let payload = encode(message)?;
        self.send(HubCommand::SendTo { viewer, payload }).await
    }

    pub async fn status(&self) -> Result<HubStatus> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(HubCommand::Status { response_tx }).await?;
        response_rx.await.context("Response channel closed")
    }

    async fn send(&self, cmd: HubCommand) -> Result<()> {
        self.tx.send(cmd).await.context("Hub channel closed")
    }
}

fn encode(message: &ViewerMessage) -> Result<Payload> {
    let json = serde_json::to_string(message).context("Failed to serialize viewer message")?;
    Ok(Arc::from(json))
}

// ============================================================================
// Hub
// ============================================================================

/// Hub - owns both registration maps
pub struct Hub {
    rx: mpsc::Receiver<HubCommand>,
    viewers: HashMap<ViewerId, mpsc::Sender<Payload>>,
    /// Ordered so the barrier-status snapshot is sorted
    barriers: BTreeMap<BarrierId, BarrierSession>,
}

impl Hub {
    /// Create the hub and its handle
    pub fn new(capacity: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(capacity);
        let hub = Self {
            rx,
            viewers: HashMap::new(),
            barriers: BTreeMap::new(),
        };
        (hub, HubHandle { tx })
    }

    /// Run the hub loop until every handle is dropped
    pub async fn run(mut self) {
        info!("Hub starting");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                HubCommand::RegisterViewer(session) => self.register_viewer(session),
                HubCommand::UnregisterViewer(viewer) => self.unregister_viewer(viewer),
                HubCommand::RegisterBarrier {
                    session,
                    response_tx,
                } => {
                    let accepted = self.register_barrier(session);
                    let _ = response_tx.send(accepted);
                }
                HubCommand::UnregisterBarrier(barrier) => self.unregister_barrier(barrier),
                HubCommand::Broadcast(payload) => self.broadcast(&payload),
                HubCommand::SendTo { viewer, payload } => self.send_to(viewer, payload),
                HubCommand::Status { response_tx } => {
                    let _ = response_tx.send(self.status());
                }
            }
        }

        info!("Hub stopped");
    }

    fn register_viewer(&mut self, session: ViewerSession) {
        let ViewerSession { id, queue } = session;
        self.viewers.insert(id, queue);
        debug!(viewer = id, viewers = self.viewers.len(), "Viewer registered");

        if let Some(payload) = self.barrier_status() {
            self.send_to(id, payload);
        }
    }

    fn unregister_viewer(&mut self, viewer: ViewerId) {
        // Dropping the sender closes the queue
        if self.viewers.remove(&viewer).is_some() {
            debug!(viewer, viewers = self.viewers.len(), "Viewer unregistered");
        }
    }

    fn register_barrier(&mut self, session: BarrierSession) -> bool {
        if self.barriers.contains_key(&session.id) {
            warn!(barrier = session.id, "Barrier already connected, rejecting");
            return false;
        }

        info!(barrier = session.id, "Registering barrier");
        self.barriers.insert(session.id, session);
        self.broadcast_barrier_status();
        true
    }

    fn unregister_barrier(&mut self, barrier: BarrierId) {
        if self.barriers.remove(&barrier).is_some() {
            info!(barrier, "Unregistering barrier");
        }
        self.broadcast_barrier_status();
    }

    /// Non-blocking delivery; a viewer whose queue is full is evicted.
    fn broadcast(&mut self, payload: &Payload) {
        self.viewers.retain(|&id, queue| match queue.try_send(Arc::clone(payload)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(viewer = id, "Viewer queue full, dropping viewer");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(viewer = id, "Viewer queue closed, removing");
                false
            }
        });
    }

    fn send_to(&mut self, viewer: ViewerId, payload: Payload) {
        let Some(queue) = self.viewers.get(&viewer) else {
            debug!(viewer, "Message for unknown viewer dropped");
            return;
        };
        match queue.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(viewer, "Viewer queue full, dropping viewer");
                self.viewers.remove(&viewer);
            }
            Err(TrySendError::Closed(_)) => {
                self.viewers.remove(&viewer);
            }
        }
    }

    fn barrier_status(&self) -> Option<Payload> {
        let ids = self.barriers.keys().copied().collect();
        match encode(&ViewerMessage::Barriers(ids)) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("Barrier status not sent: {:#}", e);
                None
            }
        }
    }

    fn broadcast_barrier_status(&mut self) {
        if let Some(payload) = self.barrier_status() {
            self.broadcast(&payload);
        }
    }

    fn status(&self) -> HubStatus {
        HubStatus {
            barriers: self.barriers.keys().copied().collect(),
            viewers: self.viewers.len(),
        }
    }
}

/// Create the hub, spawn its loop and return the handle
pub fn spawn(capacity: usize) -> HubHandle {
    let (hub, handle) = Hub::new(capacity);
    tokio::spawn(hub.run());
    handle
}
