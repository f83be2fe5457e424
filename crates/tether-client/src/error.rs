//! Client error types.

use thiserror::Error;

/// Error raised on the fallible transport paths.
///
/// These never reach the caller as Err values. The transports convert them
/// into failed command outcomes at the task boundary, and the state machine
/// absorbs them into connectivity transitions.
#[derive(Debug, Error)]
pub enum TetherError {
    /// Network or transport-level HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The relay or device answered with a non-success HTTP status.
    #[error("unexpected HTTP status: {0}")]
    Status(reqwest::StatusCode),

    /// Wire payload encoding or decoding failed.
    #[error("wire error: {0}")]
    Wire(#[from] tether_wire::WireError),

    /// A local send was requested before a local endpoint was learned.
    #[error("no local endpoint known")]
    NoLocalEndpoint,
}

/// Convenience Result alias for client operations.
pub type TetherResult<T> = Result<T, TetherError>;
