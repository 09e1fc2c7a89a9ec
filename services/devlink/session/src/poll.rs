//! Cooperative poll loop.

use crate::error::SessionError;
use crate::machine::ConnectionStateMachine;
use crate::peer::{Authenticator, ProtocolPeer};
use crate::transport::Transport;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Upper bound on how long one tick waits for inbound data
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Drives a state machine one bounded step at a time.
///
/// Each tick ensures the link is up, waits up to the poll interval for
/// inbound data and then gives the protocol peer its turn, so the peer's
/// time-driven work runs at least once per interval even on an idle link.
pub struct PollLoop<T, A, P> {
    machine: ConnectionStateMachine<T, A, P>,
    poll_interval: Duration,
}

impl<T, A, P> PollLoop<T, A, P>
where
    T: Transport,
    A: Authenticator,
    P: ProtocolPeer,
{
    /// Wrap a state machine using the default poll interval
    pub fn new(machine: ConnectionStateMachine<T, A, P>) -> Self {
        Self {
            machine,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Override the readability wait bound
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The driven state machine
    pub fn machine(&self) -> &ConnectionStateMachine<T, A, P> {
        &self.machine
    }

    /// Mutable access to the driven state machine
    pub fn machine_mut(&mut self) -> &mut ConnectionStateMachine<T, A, P> {
        &mut self.machine
    }

    /// One iteration.
    ///
    /// Link failures are absorbed here and repaired by the next tick. The
    /// only error is `SessionError::Stopped`.
    pub fn tick(&mut self) -> Result<(), SessionError> {
        self.machine.ensure_connected()?;

        let data_available = match self.machine.wait_readable(self.poll_interval) {
            Ok(ready) => ready,
            Err(err) => {
                self.machine.socket_error(&err);
                return Ok(());
            }
        };

        if let Err(err) = self.machine.on_tick(Instant::now(), data_available) {
            debug!("Tick ended the session: {}", err);
        }
        Ok(())
    }

    /// Tick until stopped
    pub fn run(&mut self) {
        info!("Starting link to {}", self.machine.config().endpoint);
        while self.tick().is_ok() {}

        let stats = self.machine.stats();
        info!(
            "Link stopped after {} sessions ({} bytes in, {} bytes out)",
            stats.sessions, stats.bytes_in, stats.bytes_out
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::SessionConfig;
    use crate::mock::{recorder, states, MockTransport, RecordingPeer, ScriptedAuth};
    use crate::peer::Credentials;
    use crate::state::ConnectionState;
    use crate::transport::Endpoint;
    use std::thread;

    type TestLoop = PollLoop<MockTransport, ScriptedAuth, RecordingPeer>;

    fn poll_loop(reconnect_interval: Duration) -> TestLoop {
        let config = SessionConfig {
            endpoint: Endpoint::new("device.test", 25200),
            reconnect_interval,
        };
        let machine = ConnectionStateMachine::new(
            config,
            Credentials::new("alice", "sensor-7", "secret"),
            MockTransport::new(),
            ScriptedAuth::default(),
            RecordingPeer::default(),
        );
        PollLoop::new(machine).with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_idle_tick_still_runs_peer() {
        let mut poll = poll_loop(Duration::from_millis(1));

        poll.tick().unwrap();
        poll.tick().unwrap();

        assert!(poll.machine().is_connected());
        assert_eq!(poll.machine().peer().ticks, 2);
        assert!(poll.machine().peer().messages.is_empty());
    }

    #[test]
    fn test_short_read_reconnects_on_next_tick() {
        // a long interval: the steady-state reconnect must not wait for it
        let mut poll = poll_loop(Duration::from_secs(30));
        let (listener, log) = recorder();
        poll.machine_mut().add_listener(listener);

        poll.tick().unwrap();
        poll.machine_mut()
            .transport_mut()
            .inbound
            .extend([9u8; 7]);

        poll.tick().unwrap();
        assert!(!poll.machine().is_connected());
        assert_eq!(poll.machine().state(), Some(ConnectionState::SocketDisconnected));

        let start = Instant::now();
        poll.tick().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(poll.machine().is_connected());
        assert_eq!(poll.machine().transport().connects, 2);

        let seen = states(&log);
        let disconnected = seen
            .iter()
            .position(|s| *s == ConnectionState::SocketDisconnected)
            .unwrap();
        assert_eq!(seen[disconnected + 1], ConnectionState::NetworkConnecting);
    }

    #[test]
    fn test_wait_failure_reports_socket_error() {
        let mut poll = poll_loop(Duration::from_millis(1));
        poll.tick().unwrap();
        let ticks = poll.machine().peer().ticks;

        let (listener, log) = recorder();
        poll.machine_mut().add_listener(listener);
        poll.machine_mut().transport_mut().fail_waits = 1;

        poll.tick().unwrap();

        assert_eq!(
            states(&log),
            vec![
                ConnectionState::SocketError,
                ConnectionState::SocketDisconnected
            ]
        );
        assert_eq!(poll.machine().peer().ticks, ticks);
        assert!(!poll.machine().is_connected());
    }

    #[test]
    fn test_data_is_dispatched_once_per_tick() {
        let mut poll = poll_loop(Duration::from_millis(1));
        poll.tick().unwrap();
        poll.machine_mut()
            .transport_mut()
            .inbound
            .extend(b"aaaaaaaaaabbbbbbbbbb");

        poll.tick().unwrap();
        assert_eq!(poll.machine().peer().messages.len(), 1);
        poll.tick().unwrap();
        assert_eq!(
            poll.machine().peer().messages,
            vec![b"aaaaaaaaaa".to_vec(), b"bbbbbbbbbb".to_vec()]
        );
    }

    #[test]
    fn test_run_returns_after_stop() {
        let mut poll = poll_loop(Duration::from_millis(1));
        let stop = poll.machine().stop_handle();
        let (listener, log) = recorder();
        poll.machine_mut().add_listener(listener);

        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stop.stop();
        });

        poll.run();
        stopper.join().unwrap();

        assert!(matches!(poll.tick(), Err(SessionError::Stopped)));
        let seen = states(&log);
        assert_eq!(seen.last(), Some(&ConnectionState::StopRequested));
        assert!(seen.contains(&ConnectionState::SocketDisconnected));
        assert!(!poll.machine().transport().is_open());
    }
}
