//! Barrier Session
//!
//! `Open → Registering → Active → Closed`. Registration happens on the hub
//! before the websocket upgrade, so only an accepted identity reaches
//! [`run`]; a rejected one never reads any sensor data.
//!
//! While active, a pinger sends a ping every `ping_period` and a reader
//! decodes `{"timestamp": <µs since epoch>}` frames. Only pongs extend the
//! read deadline, so a barrier that stops answering pings is dropped after
//! `pong_wait` even if it keeps sending events.

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, timeout_at, Instant};
use tracing::{debug, error, info, warn};

use super::write_frame;
use crate::config::BarrierConfig;
use crate::race_guard::RaceGuard;
use crate::types::BarrierId;

/// Keep-alive and framing limits of a barrier link
#[derive(Debug, Clone, Copy)]
pub struct BarrierSettings {
    pub ping_period: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub max_message_size: usize,
}

impl From<&BarrierConfig> for BarrierSettings {
    fn from(cfg: &BarrierConfig) -> Self {
        Self {
            ping_period: cfg.ping_period(),
            pong_wait: cfg.pong_wait(),
            write_wait: cfg.write_wait(),
            max_message_size: cfg.max_message_size,
        }
    }
}

/// Inbound crossing event
#[derive(Debug, Deserialize)]
struct BarrierEvent {
    timestamp: i64,
}

/// Why a frame was discarded
#[derive(Debug, PartialEq, Eq)]
enum FrameFault {
    TooLarge(usize),
    Malformed(String),
    MissingTimestamp,
    OutOfRange(i64),
}

impl Display for FrameFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameFault::TooLarge(len) => write!(f, "frame of {} bytes too large", len),
            FrameFault::Malformed(e) => write!(f, "message parse error: {}", e),
            FrameFault::MissingTimestamp => write!(f, "missing timestamp"),
            FrameFault::OutOfRange(ts) => write!(f, "timestamp {} out of range", ts),
        }
    }
}

fn decode_event(frame: &[u8], max_len: usize) -> Result<DateTime<Utc>, FrameFault> {
    if frame.len() > max_len {
        return Err(FrameFault::TooLarge(frame.len()));
    }
    let event: BarrierEvent =
        serde_json::from_slice(frame).map_err(|e| FrameFault::Malformed(e.to_string()))?;
    if event.timestamp == 0 {
        return Err(FrameFault::MissingTimestamp);
    }
    DateTime::from_timestamp_micros(event.timestamp).ok_or(FrameFault::OutOfRange(event.timestamp))
}

/// Run an already registered barrier session, then unregister it.
pub async fn run<S, R, E>(
    barrier: BarrierId,
    sink: S,
    stream: R,
    guard: Arc<RaceGuard>,
    settings: BarrierSettings,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    info!(barrier, "Barrier connected");

    tokio::select! {
        _ = pinger(barrier, sink, settings) => {}
        _ = reader(barrier, stream, &guard, settings) => {}
    }

    if let Err(e) = guard.hub().unregister_barrier(barrier).await {
        warn!(barrier, "Barrier unregister failed: {:#}", e);
    }
    info!(barrier, "Barrier disconnected");
}

async fn pinger<S>(barrier: BarrierId, mut sink: S, settings: BarrierSettings)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ticker = interval_at(Instant::now() + settings.ping_period, settings.ping_period);
    loop {
        ticker.tick().await;
        if !write_frame(&mut sink, Message::Ping(Vec::new()), settings.write_wait).await {
            debug!(barrier, "Ping failed");
            let _ = sink.close().await;
            return;
        }
    }
}

async fn reader<R, E>(barrier: BarrierId, mut stream: R, guard: &RaceGuard, settings: BarrierSettings)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + settings.pong_wait;

    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Err(_) => {
                warn!(barrier, "No pong within deadline");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                debug!(barrier, "Read failed: {}", e);
                return;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let payload = match frame {
            Message::Pong(_) => {
                deadline = Instant::now() + settings.pong_wait;
                continue;
            }
            Message::Ping(_) => continue,
            Message::Close(_) => return,
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
        };

        let time = match decode_event(&payload, settings.max_message_size) {
            Ok(time) => time,
            Err(fault) => {
                warn!(
                    barrier,
                    frame = %String::from_utf8_lossy(&payload),
                    "Frame discarded: {}",
                    fault
                );
                continue;
            }
        };

        // A store failure loses this crossing only
        if let Err(e) = guard.record_crossing(barrier, time).await {
            error!(barrier, %time, "Failed to record crossing: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_event() {
        let time = decode_event(br#"{"timestamp": 1700000000123456}"#, 512).unwrap();
        assert_eq!(time.timestamp_micros(), 1_700_000_000_123_456);
    }

    #[test]
    fn test_decode_faults() {
        assert_eq!(
            decode_event(br#"{"timestamp": 0}"#, 512),
            Err(FrameFault::MissingTimestamp)
        );
        assert!(matches!(
            decode_event(br#"{"time": 5}"#, 512),
            Err(FrameFault::Malformed(_))
        ));
        assert!(matches!(
            decode_event(b"garbage", 512),
            Err(FrameFault::Malformed(_))
        ));
        assert!(matches!(
            decode_event(br#"{"timestamp": "12"}"#, 512),
            Err(FrameFault::Malformed(_))
        ));
        assert_eq!(
            decode_event(br#"{"timestamp": 1}"#, 4),
            Err(FrameFault::TooLarge(16))
        );
        assert_eq!(
            decode_event(br#"{"timestamp": 9223372036854775807}"#, 512),
            Err(FrameFault::OutOfRange(i64::MAX))
        );
    }
}
