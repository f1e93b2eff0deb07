//! System-wide default constants.
//!
//! Grouped by subsystem. Config structs fall back to these when a key is
//! absent from `scoreapp.toml`.

// ============================================================================
// Server / Storage
// ============================================================================

/// Default HTTP bind address. Port mnemonic: f1/10.
pub const SERVER_ADDR: &str = "0.0.0.0:4110";

/// Bind address used with `--loopback`.
pub const LOOPBACK_ADDR: &str = "127.0.0.1:4110";

/// Default sled database directory.
pub const STORAGE_PATH: &str = "./data/scoreapp.db";

// ============================================================================
// Barrier Sessions
// ============================================================================

/// Ping period on barrier links (ms).
pub const BARRIER_PING_PERIOD_MS: u64 = 10_000;

/// A barrier silent for longer than this is presumed dead (ms). 11/10 of the ping period.
pub const BARRIER_PONG_WAIT_MS: u64 = BARRIER_PING_PERIOD_MS * 11 / 10;

/// Largest inbound barrier frame accepted (bytes).
pub const BARRIER_MAX_MESSAGE_SIZE: usize = 512;

// ============================================================================
// Viewer Sessions
// ============================================================================

/// Outbound queue depth per viewer. A viewer whose queue fills up is evicted.
pub const VIEWER_QUEUE_CAPACITY: usize = 256;

/// Time a viewer is allowed to answer with a pong (ms).
pub const VIEWER_PONG_WAIT_MS: u64 = 60_000;

/// Ping period on viewer links (ms). 9/10 of the pong wait.
pub const VIEWER_PING_PERIOD_MS: u64 = VIEWER_PONG_WAIT_MS * 9 / 10;

// ============================================================================
// Shared
// ============================================================================

/// Time allowed to write one frame to a peer (ms).
pub const WRITE_WAIT_MS: u64 = 10_000;

/// Capacity of the hub's request queue.
pub const HUB_CHANNEL_CAPACITY: usize = 1_024;

// ============================================================================
// Races
// ============================================================================

/// Second crossing within this window of the first is treated as a double trigger (ms).
pub const DEBOUNCE_WINDOW_MS: u64 = 1_000;

/// Time-trial duration when none is given (ms). 5 minutes.
pub const DEFAULT_TIME_DURATION_MS: u64 = 300_000;

/// Head-to-head lap count when none is given.
pub const DEFAULT_LAPS: u32 = 10;

// ============================================================================
// Simulator
// ============================================================================

/// Delay before the simulator emits its first crossing (ms).
pub const SIMULATOR_STARTUP_DELAY_MS: u64 = 1_000;

/// Minimum gap between simulated crossings (ms).
pub const SIMULATOR_MIN_GAP_MS: u64 = 5_000;

/// Random jitter added to the simulated gap (ms).
pub const SIMULATOR_JITTER_MS: u64 = 3_000;
