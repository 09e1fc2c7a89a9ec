//! Session error types.

use crate::transport::TransportError;
use link_wire::WireError;
use thiserror::Error;

/// Session errors.
///
/// None of these are fatal to the link: every one of them ends the current
/// connection and the state machine reconnects. Only `Stopped` ends the loop.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Transport-level failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The authentication procedure rejected the credentials
    #[error("authentication failed")]
    AuthFailed,

    /// The peer sent bytes that do not form a valid frame
    #[error("protocol error: {0}")]
    Wire(#[from] WireError),

    /// A stop was requested
    #[error("stop requested")]
    Stopped,
}
