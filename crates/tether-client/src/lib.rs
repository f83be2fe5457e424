//! Client connection to a tether device.
//!
//! Commands travel through the relay (fire POST plus long-poll reply
//! correlation) until a heartbeat learns the device's local endpoint and
//! verifies it, at which point sends upgrade to the direct local path. When
//! the local link degrades, sends fall back to the relay and the heartbeat
//! starts probing from scratch.
//!
//! This crate provides:
//! - Heartbeat-driven reachability probing and path upgrades
//! - Edge-triggered connect/disconnect lifecycle events
//! - At-most-once reply delivery for correlated commands

mod connection;
mod error;
mod local;
mod remote;
mod reply;
mod state;

pub use connection::{DeviceConnection, TetherConfig};
pub use error::{TetherError, TetherResult};
pub use reply::{CommandOutcome, PendingReply};
pub use state::{LocalEndpoint, TetherEvent};

pub use tether_wire::CommandMessage;
