//! Per-connection sessions
//!
//! Each session runs two cooperating futures over the split connection (a
//! keep-alive/write side and a read side) joined with `tokio::select!`: the
//! first one to finish tears the session down and unregisters it from the hub.
//!
//! Sessions are generic over the `Sink`/`Stream` halves so they run the same
//! over an axum websocket and over in-memory channels in tests.

pub mod barrier;
pub mod viewer;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::time::timeout;

/// Write one frame within `write_wait`; `false` if the peer must be dropped.
async fn write_frame<S>(sink: &mut S, frame: Message, write_wait: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match timeout(write_wait, sink.send(frame)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!("Write failed: {}", e);
            false
        }
        Err(_) => {
            tracing::debug!("Write deadline exceeded");
            false
        }
    }
}
