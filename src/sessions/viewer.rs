//! Viewer Session
//!
//! Outbound only. The write loop forwards every queued payload as one text
//! frame and pings on a timer; inbound frames are drained so liveness frames
//! get answered, never interpreted. When the hub drops the queue the loop
//! sends a close frame and ends.

use axum::extract::ws::Message;
use futures::{Sink, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

use super::write_frame;
use crate::config::ViewerConfig;
use crate::hub::{HubHandle, Payload, ViewerId, ViewerSession};
use crate::race_guard::RaceGuard;

#[derive(Debug, Clone, Copy)]
pub struct ViewerSettings {
    pub queue_capacity: usize,
    pub ping_period: Duration,
    pub write_wait: Duration,
}

impl From<&ViewerConfig> for ViewerSettings {
    fn from(cfg: &ViewerConfig) -> Self {
        Self {
            queue_capacity: cfg.queue_capacity,
            ping_period: cfg.ping_period(),
            write_wait: cfg.write_wait(),
        }
    }
}

/// Register a new viewer, queue its current-race snapshot and run it.
///
/// The hub queues the barrier snapshot itself on registration.
pub async fn serve<S, R, E>(sink: S, stream: R, races: Arc<RaceGuard>, settings: ViewerSettings)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let (session, queue) = ViewerSession::new(settings.queue_capacity);
    let viewer = session.id();
    let hub = races.hub().clone();

    if let Err(e) = hub.register_viewer(session).await {
        warn!(viewer, "Viewer registration failed: {:#}", e);
        return;
    }
    if let Err(e) = races.announce_current(viewer).await {
        warn!(viewer, "Current race snapshot not sent: {:#}", e);
    }

    run(viewer, queue, sink, stream, hub, settings).await;
}

/// Run a registered viewer until its link or queue closes, then unregister it.
pub async fn run<S, R, E>(
    viewer: ViewerId,
    queue: mpsc::Receiver<Payload>,
    sink: S,
    stream: R,
    hub: HubHandle,
    settings: ViewerSettings,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    debug!(viewer, "Viewer connected");

    tokio::select! {
        _ = write_loop(viewer, queue, sink, settings) => {}
        _ = drain(viewer, stream) => {}
    }

    if let Err(e) = hub.unregister_viewer(viewer).await {
        warn!(viewer, "Viewer unregister failed: {:#}", e);
    }
    debug!(viewer, "Viewer disconnected");
}

async fn write_loop<S>(
    viewer: ViewerId,
    mut queue: mpsc::Receiver<Payload>,
    mut sink: S,
    settings: ViewerSettings,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ticker = interval_at(Instant::now() + settings.ping_period, settings.ping_period);

    loop {
        let frame = tokio::select! {
            payload = queue.recv() => match payload {
                Some(payload) => Message::Text(payload.to_string()),
                None => {
                    debug!(viewer, "Queue closed by hub");
                    let _ = write_frame(&mut sink, Message::Close(None), settings.write_wait).await;
                    return;
                }
            },
            _ = ticker.tick() => Message::Ping(Vec::new()),
        };

        if !write_frame(&mut sink, frame, settings.write_wait).await {
            return;
        }
    }
}

async fn drain<R, E>(viewer: ViewerId, mut stream: R)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) => return,
            Ok(_) => {}
            Err(e) => {
                debug!(viewer, "Read failed: {}", e);
                return;
            }
        }
    }
}
