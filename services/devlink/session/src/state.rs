//! Connection states and the observers notified on every transition.
//!
//! A single ordered stream of [`ConnectionState`] values is emitted by the
//! state machine. Observers run synchronously on the calling thread, so they
//! must return quickly; [`ChannelListener`] hands states to another task
//! instead of doing work inline.

use std::fmt;
use tokio::sync::mpsc;

/// Connection lifecycle states.
///
/// The usual sequences are:
/// - `NetworkConnecting` -> `SocketConnecting` -> `NetworkConnectError` (retry later)
/// - `NetworkConnecting` -> `SocketConnecting` -> `SocketConnected` ->
///   `Authenticating` -> `Authenticated` (steady state)
/// - `Authenticating` -> `AuthFailed` -> `SocketDisconnected` (retry later)
/// - steady state -> `SocketDisconnected` (reconnect on the next tick)
///
/// `StopRequested` is terminal and only reached through an explicit stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Starting a connection attempt
    NetworkConnecting,
    /// Network layer available. Reserved for transports that report it.
    NetworkConnected,
    /// The connection attempt failed before a socket was established
    NetworkConnectError,
    /// Resolving and opening the socket
    SocketConnecting,
    /// Socket (and TLS session, if any) established
    SocketConnected,
    /// Socket-level failure. Reserved for transports that report it.
    SocketConnectionError,
    /// The live connection was torn down
    SocketDisconnected,
    /// The connect attempt timed out
    SocketTimeout,
    /// Waiting on the socket failed
    SocketError,
    /// Running the authentication procedure
    Authenticating,
    /// Authenticated; application data may flow
    Authenticated,
    /// The server rejected the credentials
    AuthFailed,
    /// Stopped on request; no further attempts are made
    StopRequested,
}

impl ConnectionState {
    /// Short static name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::NetworkConnecting => "NetworkConnecting",
            ConnectionState::NetworkConnected => "NetworkConnected",
            ConnectionState::NetworkConnectError => "NetworkConnectError",
            ConnectionState::SocketConnecting => "SocketConnecting",
            ConnectionState::SocketConnected => "SocketConnected",
            ConnectionState::SocketConnectionError => "SocketConnectionError",
            ConnectionState::SocketDisconnected => "SocketDisconnected",
            ConnectionState::SocketTimeout => "SocketTimeout",
            ConnectionState::SocketError => "SocketError",
            ConnectionState::Authenticating => "Authenticating",
            ConnectionState::Authenticated => "Authenticated",
            ConnectionState::AuthFailed => "AuthFailed",
            ConnectionState::StopRequested => "StopRequested",
        }
    }

    /// Whether the link is usable for application data
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Authenticated)
    }

    /// Whether no further transitions will happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::StopRequested)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer of state transitions
pub trait StateListener {
    /// Called once per transition, in order
    fn on_state(&mut self, state: ConnectionState);
}

impl<F> StateListener for F
where
    F: FnMut(ConnectionState),
{
    fn on_state(&mut self, state: ConnectionState) {
        self(state)
    }
}

/// Forwards every transition into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<ConnectionState>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConnectionState>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StateListener for ChannelListener {
    fn on_state(&mut self, state: ConnectionState) {
        // a dropped receiver only means nobody is watching any more
        let _ = self.tx.send(state);
    }
}
