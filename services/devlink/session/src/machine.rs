//! Connection lifecycle state machine.
//!
//! # State Machine
//!
//! ```text
//!            ┌───────────────────── sleep(reconnect_interval) ◄──────────────────┐
//!            ▼                                                                   │
//! NetworkConnecting ─► SocketConnecting ──fail──► NetworkConnectError ───────────┤
//!                            │                                                   │
//!                            ▼ ok                                                │
//!                     SocketConnected ─► Authenticating ──fail──► AuthFailed ─► SocketDisconnected
//!                                              │
//!                                              ▼ ok
//!                                        Authenticated ──read/write/wait failure──► SocketDisconnected
//!                                                                                   (reconnect on next tick)
//! ```
//!
//! Retries are unbounded and spaced by a constant interval. A stop request
//! tears down the live connection, emits `StopRequested` once and ends all
//! further attempts.

use crate::error::SessionError;
use crate::io::LinkIo;
use crate::output::OutputCoalescer;
use crate::peer::{Authenticator, Credentials, ProtocolPeer};
use crate::state::{ConnectionState, StateListener};
use crate::stats::LinkStats;
use crate::stop::StopHandle;
use crate::transport::{Endpoint, Transport, TransportError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fixed wait between a failed attempt and the next one
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(15);

/// Configuration for a device link session
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Server to connect to
    pub endpoint: Endpoint,
    /// Wait between a failed attempt and the next one
    pub reconnect_interval: Duration,
}

impl SessionConfig {
    /// Create a configuration with the default reconnect interval
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// Owns the transport and drives connect, authenticate, relay and teardown
pub struct ConnectionStateMachine<T, A, P> {
    config: SessionConfig,
    credentials: Credentials,
    transport: T,
    authenticator: A,
    peer: P,
    output: OutputCoalescer,
    listeners: Vec<Box<dyn StateListener + Send>>,
    state: Option<ConnectionState>,
    authenticated: bool,
    stop: StopHandle,
    stop_emitted: bool,
    stats: LinkStats,
}

impl<T, A, P> ConnectionStateMachine<T, A, P>
where
    T: Transport,
    A: Authenticator,
    P: ProtocolPeer,
{
    /// Create a disconnected state machine
    pub fn new(
        config: SessionConfig,
        credentials: Credentials,
        transport: T,
        authenticator: A,
        peer: P,
    ) -> Self {
        Self {
            config,
            credentials,
            transport,
            authenticator,
            peer,
            output: OutputCoalescer::new(),
            listeners: Vec::new(),
            state: None,
            authenticated: false,
            stop: StopHandle::new(),
            stop_emitted: false,
            stats: LinkStats::default(),
        }
    }

    /// Use an externally created stop handle
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Register an observer for every subsequent transition
    pub fn add_listener<L>(&mut self, listener: L)
    where
        L: StateListener + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Handle that stops this state machine from any thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Most recently emitted state, `None` before the first attempt
    pub fn state(&self) -> Option<ConnectionState> {
        self.state
    }

    /// Whether the link is authenticated and the transport live
    pub fn is_connected(&self) -> bool {
        self.authenticated && self.transport.is_open()
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Link statistics
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Pending output
    pub fn output(&self) -> &OutputCoalescer {
        &self.output
    }

    /// The transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The protocol peer
    pub fn peer(&self) -> &P {
        &self.peer
    }

    /// Mutable access to the protocol peer, e.g. to queue outbound data
    pub fn peer_mut(&mut self) -> &mut P {
        &mut self.peer
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    #[cfg(test)]
    pub(crate) fn authenticator_mut(&mut self) -> &mut A {
        &mut self.authenticator
    }

    fn emit(&mut self, state: ConnectionState) {
        debug!("State -> {}", state);
        self.state = Some(state);
        for listener in &mut self.listeners {
            listener.on_state(state);
        }
    }

    /// Block until authenticated, retrying forever at the fixed interval.
    ///
    /// Returns `Err(SessionError::Stopped)` once a stop has been requested;
    /// that is the only error this returns.
    pub fn ensure_connected(&mut self) -> Result<(), SessionError> {
        loop {
            if self.stop.is_stopped() {
                self.halt();
                return Err(SessionError::Stopped);
            }

            if self.is_connected() {
                return Ok(());
            }

            match self.connect_once() {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(
                        "Cannot connect to {}: {}. Trying again in {:?}",
                        self.config.endpoint, err, self.config.reconnect_interval
                    );
                    if self.stop.sleep(self.config.reconnect_interval) {
                        self.halt();
                        return Err(SessionError::Stopped);
                    }
                }
            }
        }
    }

    /// One attempt: connect, then authenticate
    fn connect_once(&mut self) -> Result<(), SessionError> {
        // a stale handle must be fully released before a new connect
        self.disconnect();

        self.stats.connect_attempts += 1;
        self.emit(ConnectionState::NetworkConnecting);
        self.emit(ConnectionState::SocketConnecting);

        if let Err(err) = self.transport.connect(&self.config.endpoint) {
            self.transport.close();
            if err.is_timeout() {
                self.emit(ConnectionState::SocketTimeout);
            }
            self.emit(ConnectionState::NetworkConnectError);
            return Err(err.into());
        }

        info!("Connected to {}", self.config.endpoint);
        self.emit(ConnectionState::SocketConnected);

        info!("Authenticating...");
        self.emit(ConnectionState::Authenticating);

        let (result, broken) = {
            let mut io = LinkIo::new(&mut self.transport, &mut self.output, &mut self.stats);
            let result = self.authenticator.authenticate(&mut io, &self.credentials);
            (result, io.is_broken())
        };

        match result {
            Ok(()) if broken => {
                warn!("Cannot authenticate: link broke during the exchange");
                self.emit(ConnectionState::AuthFailed);
                self.disconnect();
                Err(SessionError::AuthFailed)
            }
            Ok(()) => {
                self.authenticated = true;
                self.stats.sessions += 1;
                self.stats.last_connected = Some(Instant::now());
                info!("Authenticated!");
                self.emit(ConnectionState::Authenticated);
                Ok(())
            }
            Err(err) => {
                warn!("Cannot authenticate: {}", err);
                self.emit(ConnectionState::AuthFailed);
                self.disconnect();
                Err(SessionError::AuthFailed)
            }
        }
    }

    /// Tear down the live connection, if any.
    ///
    /// Closes the transport, discards unflushed output, resets the peer and
    /// emits `SocketDisconnected`. Without a live transport this does nothing.
    pub fn disconnect(&mut self) {
        self.authenticated = false;
        if !self.transport.is_open() {
            return;
        }

        self.transport.close();

        let dropped = self.output.discard();
        if dropped > 0 {
            debug!("Discarded {} unflushed bytes", dropped);
        }

        self.stats.disconnects += 1;
        self.peer.on_disconnected();
        info!("Disconnected from {}", self.config.endpoint);
        self.emit(ConnectionState::SocketDisconnected);
    }

    /// Wait up to `timeout` for inbound data on the live transport
    pub fn wait_readable(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        self.transport.wait_readable(timeout)
    }

    /// The readability wait failed: report it and tear down
    pub fn socket_error(&mut self, err: &TransportError) {
        warn!("Socket error: {}", err);
        self.emit(ConnectionState::SocketError);
        self.disconnect();
    }

    /// Steady-state step.
    ///
    /// With `data_available`, the peer performs one read-driven dispatch.
    /// The peer then always gets its time-driven turn. Any I/O failure tears
    /// the connection down and is returned; the next `ensure_connected`
    /// starts over.
    pub fn on_tick(&mut self, now: Instant, data_available: bool) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }

        if data_available {
            self.relay(|peer, io| peer.handle_input(io))?;
        }

        self.relay(|peer, io| peer.handle_tick(now, io))
    }

    fn relay<F>(&mut self, step: F) -> Result<(), SessionError>
    where
        F: FnOnce(&mut P, &mut LinkIo<'_>) -> Result<(), SessionError>,
    {
        let (result, broken) = {
            let mut io = LinkIo::new(&mut self.transport, &mut self.output, &mut self.stats);
            let result = step(&mut self.peer, &mut io);
            (result, io.is_broken())
        };

        match result {
            Err(err) => {
                debug!("Link lost: {}", err);
                self.disconnect();
                Err(err)
            }
            Ok(()) if broken => {
                self.disconnect();
                Err(TransportError::NotConnected.into())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Stop from the owning thread: same effect as `StopHandle::stop`
    /// observed at the next check, applied immediately
    pub fn request_stop(&mut self) {
        self.stop.stop();
        self.halt();
    }

    /// Whether a stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Apply a requested stop: tear down, then emit `StopRequested` once
    pub(crate) fn halt(&mut self) {
        self.disconnect();
        if !self.stop_emitted {
            self.stop_emitted = true;
            info!("Stop requested, link halted");
            self.emit(ConnectionState::StopRequested);
        }
    }
}
