//! Wire types for the tether command protocol.
//!
//! This crate provides:
//! - The command payload exchanged with the device
//! - The relay long-poll reply envelope
//! - Percent-decoding of relayed reply data

mod envelope;
mod error;
mod message;

pub use envelope::PollEnvelope;
pub use error::{WireError, WireResult};
pub use message::CommandMessage;
