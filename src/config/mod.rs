//! ScoreApp Configuration Module
//!
//! Service configuration loaded from a TOML file.
//!
//! ## Loading Order
//!
//! 1. `SCOREAPP_CONFIG` environment variable (path to TOML file)
//! 2. `scoreapp.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! ## Example
//!
//! ```toml
//! [server]
//! addr = "0.0.0.0:4110"
//!
//! [storage]
//! path = "./data/scoreapp.db"
//!
//! [barrier]
//! ping_period_ms = 10000
//! pong_wait_ms = 11000
//!
//! [viewer]
//! queue_capacity = 256
//!
//! [races]
//! debounce_ms = 1000
//! ```

mod app_config;
pub mod defaults;

pub use app_config::*;
