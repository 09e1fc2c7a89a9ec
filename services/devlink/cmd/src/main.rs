//! Devlink client binary.
//!
//! Keeps one authenticated TCP or TLS link to the configured server open,
//! reconnecting at a fixed interval, until SIGINT or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use link_session::{
    ChannelListener, ConnectionStateMachine, CredentialHandshake, KeepalivePeer, PlainTransport,
    PollLoop, StopHandle, Transport,
};
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::LinkConfig;
use logging::LinkLogFormatter;

/// Always-on device link with fixed-interval reconnect
#[derive(Parser, Debug)]
#[command(name = "devlink", version, about = "Always-on device link over TCP or TLS")]
struct Args {
    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server host, overrides the configuration
    #[arg(long)]
    host: Option<String>,

    /// Server port, overrides the configuration
    #[arg(long)]
    port: Option<u16>,

    /// Enable TLS
    #[arg(long)]
    tls: bool,

    /// Wait between failed connection attempts, e.g. 15s
    #[arg(long)]
    reconnect_interval: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Command-line flags win over file and environment settings
    fn apply(&self, config: &mut LinkConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = Some(port);
        }
        if self.tls {
            config.tls.enabled = true;
        }
        if let Some(interval) = &self.reconnect_interval {
            config.reconnect_interval = interval.as_secs();
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("devlink={}", args.log_level).parse()?)
        .add_directive(format!("link_session={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(LinkLogFormatter::new("devlink"))
        .init();

    info!("Starting devlink v{}", env!("CARGO_PKG_VERSION"));

    let mut config = LinkConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let stop = StopHandle::new();
    let (listener, mut states) = ChannelListener::channel();
    tokio::spawn(async move {
        while let Some(state) = states.recv().await {
            debug!(component = "state", "{}", state);
        }
    });

    let mut link = if config.tls.enabled {
        start_tls(&config, stop.clone(), listener)?
    } else {
        let transport = PlainTransport::new().with_connect_timeout(config.connect_timeout());
        start_link(&config, transport, stop.clone(), listener)
    };

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, stopping link"),
        _ = sigint.recv() => info!("Received SIGINT, stopping link"),
        result = &mut link => {
            result.context("Link thread panicked")?;
            return Ok(());
        }
    }

    stop.stop();
    link.await.context("Link thread panicked")?;
    info!("devlink stopped");
    Ok(())
}

/// Run the poll loop on a blocking thread until `stop` fires
fn start_link<T>(
    config: &LinkConfig,
    transport: T,
    stop: StopHandle,
    listener: ChannelListener,
) -> JoinHandle<()>
where
    T: Transport + Send + 'static,
{
    let peer = KeepalivePeer::new(config.keepalive_interval()).with_sink(|payload| {
        info!(component = "data", "Received {} bytes", payload.len());
    });

    let mut machine = ConnectionStateMachine::new(
        config.session_config(),
        config.credentials(),
        transport,
        CredentialHandshake::new(),
        peer,
    )
    .with_stop_handle(stop);
    machine.add_listener(listener);

    tokio::task::spawn_blocking(move || PollLoop::new(machine).run())
}

#[cfg(feature = "tls")]
fn start_tls(
    config: &LinkConfig,
    stop: StopHandle,
    listener: ChannelListener,
) -> Result<JoinHandle<()>> {
    let transport = link_session::TlsTransport::new(&config.tls_options())
        .context("Failed to build TLS client configuration")?
        .with_connect_timeout(config.connect_timeout());
    Ok(start_link(config, transport, stop, listener))
}

#[cfg(not(feature = "tls"))]
fn start_tls(
    _config: &LinkConfig,
    _stop: StopHandle,
    _listener: ChannelListener,
) -> Result<JoinHandle<()>> {
    anyhow::bail!("TLS requested but devlink was built without the `tls` feature")
}
