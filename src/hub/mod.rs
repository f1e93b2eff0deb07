//! Live Hub: the single serialization point of the live core
//!
//! ## Responsibilities
//!
//! - Viewer membership: register / unregister, each with a bounded outbound queue
//! - Barrier membership: at most one session per barrier identity
//! - Fan-out: non-blocking broadcast, saturated viewers are evicted
//! - Barrier-presence summary pushed to viewers on every membership change

mod actor;

pub use actor::{
    spawn, BarrierSession, Hub, HubCommand, HubHandle, HubStatus, Payload, ViewerId,
    ViewerSession,
};
