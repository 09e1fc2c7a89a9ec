//! Link statistics.

use std::time::Instant;

/// Counters kept across reconnects for the lifetime of the state machine
#[derive(Clone, Debug, Default)]
pub struct LinkStats {
    /// Connection attempts started
    pub connect_attempts: u64,
    /// Attempts that reached the authenticated state
    pub sessions: u64,
    /// Teardowns of a live transport
    pub disconnects: u64,
    /// Total bytes read through the link
    pub bytes_in: u64,
    /// Total bytes flushed to the link
    pub bytes_out: u64,
    /// When the current or most recent session was authenticated
    pub last_connected: Option<Instant>,
}
