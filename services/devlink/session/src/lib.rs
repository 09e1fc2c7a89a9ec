//! Always-on client link: TCP/TLS transport, connection state machine and poll loop.
//!
//! This crate keeps one outbound connection to a fixed server alive for the
//! lifetime of a device. It connects, authenticates, relays an application
//! protocol and, whenever anything fails, tears the connection down and tries
//! again after a constant interval.
//!
//! ## Features
//!
//! - **Transports**: plain TCP and TLS (rustls) behind one [`Transport`] trait
//! - **State Machine**: ordered [`ConnectionState`] notifications to observers
//! - **Output Coalescing**: many small writes leave as one transport write
//! - **Poll Loop**: bounded readability wait, then one peer dispatch per tick
//! - **Stop Handle**: ends all attempts and interrupts a pending reconnect wait
//! - **Reference Protocol**: credential handshake and keepalive peer
//!
//! ## Example
//!
//! ```rust,no_run
//! use link_session::{
//!     ConnectionStateMachine, CredentialHandshake, Credentials, Endpoint, KeepalivePeer,
//!     PlainTransport, PollLoop, SessionConfig,
//! };
//!
//! let config = SessionConfig::new(Endpoint::new("iot.example.net", 25200));
//! let credentials = Credentials::new("alice", "sensor-7", "secret");
//!
//! let mut machine = ConnectionStateMachine::new(
//!     config,
//!     credentials,
//!     PlainTransport::new(),
//!     CredentialHandshake::new(),
//!     KeepalivePeer::default(),
//! );
//! machine.add_listener(|state| println!("link state: {}", state));
//!
//! let stop = machine.stop_handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(60));
//!     stop.stop();
//! });
//!
//! PollLoop::new(machine).run();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod handshake;
pub mod io;
pub mod keepalive;
pub mod machine;
pub mod output;
pub mod peer;
pub mod poll;
pub mod state;
pub mod stats;
pub mod stop;
pub mod transport;

#[cfg(test)]
mod mock;

// Re-export main types
pub use error::SessionError;
pub use handshake::{read_frame, send_frame, CredentialHandshake};
pub use io::LinkIo;
pub use keepalive::{DataSink, KeepalivePeer, DEFAULT_KEEPALIVE_INTERVAL};
pub use machine::{ConnectionStateMachine, SessionConfig, DEFAULT_RECONNECT_INTERVAL};
pub use output::OutputCoalescer;
pub use peer::{Authenticator, Credentials, ProtocolPeer};
pub use poll::{PollLoop, POLL_INTERVAL};
pub use state::{ChannelListener, ConnectionState, StateListener};
pub use stats::LinkStats;
pub use stop::StopHandle;
pub use transport::{
    connect_tcp, Endpoint, PlainTransport, Transport, TransportError, DEFAULT_PLAIN_PORT,
    DEFAULT_TLS_PORT,
};

// Re-export TLS functionality when available
#[cfg(feature = "tls")]
pub use transport::tls::{make_client_config, TlsOptions, TlsTransport};
