//! Scripted in-memory transport and collaborators for lifecycle tests.

use crate::error::SessionError;
use crate::io::LinkIo;
use crate::peer::{Authenticator, Credentials, ProtocolPeer};
use crate::state::ConnectionState;
use crate::transport::{Endpoint, Transport, TransportError};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How the next `connect` call ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectOutcome {
    Accept,
    Refuse,
    Unresolvable,
    TimeOut,
}

#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    pub open: bool,
    /// Consumed front to back; `Accept` once exhausted
    pub connect_script: VecDeque<ConnectOutcome>,
    pub refuse_all: bool,
    pub connects: usize,
    pub closes: usize,
    /// `connect` calls made while a connection was still live
    pub overlapping_connects: usize,
    pub inbound: VecDeque<u8>,
    pub writes: Vec<Vec<u8>>,
    pub fail_writes: bool,
    pub fail_waits: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected() -> Self {
        Self {
            open: true,
            ..Self::default()
        }
    }

    pub fn with_script(script: &[ConnectOutcome]) -> Self {
        Self {
            connect_script: script.iter().copied().collect(),
            ..Self::default()
        }
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        if self.open {
            self.overlapping_connects += 1;
        }
        self.connects += 1;

        let outcome = if self.refuse_all {
            ConnectOutcome::Refuse
        } else {
            self.connect_script
                .pop_front()
                .unwrap_or(ConnectOutcome::Accept)
        };

        let addr = SocketAddr::from(([127, 0, 0, 1], endpoint.port));
        match outcome {
            ConnectOutcome::Accept => {
                self.open = true;
                Ok(())
            }
            ConnectOutcome::Refuse => Err(TransportError::ConnectFailed {
                addr,
                source: io::ErrorKind::ConnectionRefused.into(),
            }),
            ConnectOutcome::TimeOut => Err(TransportError::ConnectFailed {
                addr,
                source: io::ErrorKind::TimedOut.into(),
            }),
            ConnectOutcome::Unresolvable => Err(TransportError::ResolutionFailed {
                host: endpoint.host.clone(),
                reason: "no such host".to_string(),
            }),
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }

        let available = self.inbound.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..available)) {
            *slot = byte;
        }

        if available < buf.len() {
            Err(TransportError::ShortRead {
                expected: buf.len(),
                read: available,
            })
        } else {
            Ok(())
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        if self.fail_writes {
            return Err(TransportError::ShortWrite {
                expected: bytes.len(),
                written: 0,
            });
        }
        self.writes.push(bytes.to_vec());
        Ok(())
    }

    fn wait_readable(&mut self, _timeout: Duration) -> Result<bool, TransportError> {
        if !self.open {
            return Err(TransportError::NotConnected);
        }
        if self.fail_waits > 0 {
            self.fail_waits -= 1;
            return Err(TransportError::WaitFailed(io::Error::new(
                io::ErrorKind::Other,
                "poll failed",
            )));
        }
        Ok(!self.inbound.is_empty())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.closes += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Accepts unless told to reject the next `reject_next` attempts
#[derive(Debug, Default)]
pub(crate) struct ScriptedAuth {
    pub reject_next: usize,
    pub calls: usize,
}

impl Authenticator for ScriptedAuth {
    fn authenticate(
        &mut self,
        _io: &mut LinkIo<'_>,
        _credentials: &Credentials,
    ) -> Result<(), SessionError> {
        self.calls += 1;
        if self.reject_next > 0 {
            self.reject_next -= 1;
            return Err(SessionError::AuthFailed);
        }
        Ok(())
    }
}

/// Reads fixed-size messages and optionally writes on every tick
#[derive(Debug)]
pub(crate) struct RecordingPeer {
    pub message_size: usize,
    pub messages: Vec<Vec<u8>>,
    pub ticks: usize,
    pub disconnects: usize,
    pub tick_output: Option<Vec<u8>>,
}

impl Default for RecordingPeer {
    fn default() -> Self {
        Self {
            message_size: 10,
            messages: Vec::new(),
            ticks: 0,
            disconnects: 0,
            tick_output: None,
        }
    }
}

impl ProtocolPeer for RecordingPeer {
    fn handle_input(&mut self, io: &mut LinkIo<'_>) -> Result<(), SessionError> {
        let mut buf = vec![0u8; self.message_size];
        io.read_exact(&mut buf)?;
        self.messages.push(buf);
        Ok(())
    }

    fn handle_tick(&mut self, _now: Instant, io: &mut LinkIo<'_>) -> Result<(), SessionError> {
        self.ticks += 1;
        if let Some(bytes) = &self.tick_output {
            io.write_flush(bytes)?;
        }
        Ok(())
    }

    fn on_disconnected(&mut self) {
        self.disconnects += 1;
    }
}

pub(crate) type StateLog = Arc<Mutex<Vec<(ConnectionState, Instant)>>>;

/// Listener that timestamps every transition
pub(crate) fn recorder() -> (impl FnMut(ConnectionState) + Send + 'static, StateLog) {
    let log: StateLog = Arc::default();
    let sink = log.clone();
    let listener = move |state: ConnectionState| {
        sink.lock().unwrap().push((state, Instant::now()));
    };
    (listener, log)
}

pub(crate) fn states(log: &StateLog) -> Vec<ConnectionState> {
    log.lock().unwrap().iter().map(|(state, _)| *state).collect()
}
