//! Steady-state peer for the reference device protocol.

use crate::error::SessionError;
use crate::handshake::{read_frame, send_frame};
use crate::io::LinkIo;
use crate::peer::ProtocolPeer;
use bytes::Bytes;
use link_wire::{Frame, FrameType, WireError, MAX_PAYLOAD_SIZE};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default spacing of keepalive probes
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Receiver for inbound `Data` payloads
pub type DataSink = Box<dyn FnMut(Bytes) + Send>;

/// Answers keepalives, probes the server periodically and relays data frames.
///
/// Outbound data queued with [`KeepalivePeer::queue`] survives reconnects and
/// is written on the next tick, coalesced with any keepalive into one flush.
pub struct KeepalivePeer {
    interval: Duration,
    last_probe: Option<Instant>,
    outbound: VecDeque<Bytes>,
    sink: Option<DataSink>,
    probes_sent: u64,
    acks_received: u64,
}

impl KeepalivePeer {
    /// Create a peer probing every `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_probe: None,
            outbound: VecDeque::new(),
            sink: None,
            probes_sent: 0,
            acks_received: 0,
        }
    }

    /// Deliver inbound `Data` payloads to `sink`
    pub fn with_sink<F>(mut self, sink: F) -> Self
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Queue a `Data` frame for the next tick
    pub fn queue(&mut self, payload: impl Into<Bytes>) -> Result<(), WireError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WireError::Size(payload.len()));
        }
        self.outbound.push_back(payload);
        Ok(())
    }

    /// Data frames waiting to be sent
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    /// Keepalive probes sent so far
    pub fn probes_sent(&self) -> u64 {
        self.probes_sent
    }

    /// Keepalive answers received so far
    pub fn acks_received(&self) -> u64 {
        self.acks_received
    }
}

impl Default for KeepalivePeer {
    fn default() -> Self {
        Self::new(DEFAULT_KEEPALIVE_INTERVAL)
    }
}

impl fmt::Debug for KeepalivePeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepalivePeer")
            .field("interval", &self.interval)
            .field("last_probe", &self.last_probe)
            .field("queued", &self.outbound.len())
            .field("has_sink", &self.sink.is_some())
            .field("probes_sent", &self.probes_sent)
            .field("acks_received", &self.acks_received)
            .finish()
    }
}

impl ProtocolPeer for KeepalivePeer {
    fn handle_input(&mut self, io: &mut LinkIo<'_>) -> Result<(), SessionError> {
        let frame = read_frame(io)?;
        match frame.typ {
            FrameType::KeepAlive => {
                trace!("Answering keepalive");
                send_frame(io, &Frame::empty(FrameType::KeepAliveAck))?;
                io.flush()?;
            }
            FrameType::KeepAliveAck => {
                self.acks_received += 1;
            }
            FrameType::Data => {
                debug!("Received {} bytes of data", frame.payload.len());
                if let Some(sink) = self.sink.as_mut() {
                    sink(frame.payload);
                }
            }
            other => {
                warn!("Ignoring unexpected {:?} frame", other);
            }
        }
        Ok(())
    }

    fn handle_tick(&mut self, now: Instant, io: &mut LinkIo<'_>) -> Result<(), SessionError> {
        let last = *self.last_probe.get_or_insert(now);
        if now.saturating_duration_since(last) >= self.interval {
            send_frame(io, &Frame::empty(FrameType::KeepAlive))?;
            self.last_probe = Some(now);
            self.probes_sent += 1;
        }

        while let Some(payload) = self.outbound.pop_front() {
            send_frame(io, &Frame::new(FrameType::Data, payload))?;
        }

        if io.pending() > 0 {
            io.flush()?;
        }
        Ok(())
    }

    fn on_disconnected(&mut self) {
        self.last_probe = None;
    }
}
