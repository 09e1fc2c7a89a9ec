//! Collaborators that speak the application protocol over a live link.
//!
//! The state machine only moves bytes; what they mean is decided by an
//! [`Authenticator`] (once per connection) and a [`ProtocolPeer`] (steady
//! state).

use crate::error::SessionError;
use crate::io::LinkIo;
use std::fmt;
use std::time::Instant;

/// Device credentials presented on every connection
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: Vec<u8>,
    device_id: Vec<u8>,
    device_secret: Vec<u8>,
}

impl Credentials {
    /// Create credentials from opaque byte strings
    pub fn new(
        username: impl Into<Vec<u8>>,
        device_id: impl Into<Vec<u8>>,
        device_secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            username: username.into(),
            device_id: device_id.into(),
            device_secret: device_secret.into(),
        }
    }

    /// Account name
    pub fn username(&self) -> &[u8] {
        &self.username
    }

    /// Device identifier
    pub fn device_id(&self) -> &[u8] {
        &self.device_id
    }

    /// Device secret
    pub fn device_secret(&self) -> &[u8] {
        &self.device_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("device_id", &String::from_utf8_lossy(&self.device_id))
            .field("device_secret", &"<redacted>")
            .finish()
    }
}

/// Authentication procedure run right after the transport connects
pub trait Authenticator {
    /// Present `credentials` over `io`; any error counts as a rejection
    fn authenticate(
        &mut self,
        io: &mut LinkIo<'_>,
        credentials: &Credentials,
    ) -> Result<(), SessionError>;
}

/// Application protocol driven by the poll loop once authenticated
pub trait ProtocolPeer {
    /// Inbound data is available: perform one read-driven dispatch
    fn handle_input(&mut self, io: &mut LinkIo<'_>) -> Result<(), SessionError>;

    /// Called on every tick, with or without inbound data
    fn handle_tick(&mut self, now: Instant, io: &mut LinkIo<'_>) -> Result<(), SessionError>;

    /// The connection was torn down; in-flight state should be reset
    fn on_disconnected(&mut self) {}
}
