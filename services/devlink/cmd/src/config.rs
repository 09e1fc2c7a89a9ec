//! Configuration handling for the devlink client.
//!
//! Settings come from built-in defaults, then an optional YAML file, then
//! `DEVLINK_*` environment variables. Command-line flags are applied last by
//! the binary.

use anyhow::{bail, Context, Result};
use link_session::{
    Credentials, Endpoint, SessionConfig, DEFAULT_PLAIN_PORT, DEFAULT_TLS_PORT,
};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Devlink client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Server to keep the link open to
    pub server: ServerConfig,
    /// Wait between failed connection attempts (seconds)
    pub reconnect_interval: u64,
    /// Device credentials
    pub credentials: CredentialsConfig,
    /// TLS configuration
    pub tls: TlsConfig,
    /// Keepalive probe spacing (seconds)
    pub keepalive_interval: u64,
    /// TCP connect timeout (seconds); blocking connect when absent
    pub connect_timeout: Option<u64>,
}

/// Server address
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or IP address
    pub host: String,
    /// Port; defaults to 25200, or 25202 with TLS
    pub port: Option<u16>,
}

/// Device credentials as configured
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Account name
    pub username: String,
    /// Device identifier
    pub device_id: String,
    /// Device secret
    pub device_secret: String,
}

/// TLS configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Whether TLS is enabled
    pub enabled: bool,
    /// Verify the server certificate chain
    pub verify_peer: bool,
    /// Path to a PEM CA bundle used when verifying
    pub ca_file: Option<PathBuf>,
    /// Name presented for SNI and verification; defaults to the host
    pub server_name: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            reconnect_interval: 15,
            credentials: CredentialsConfig::default(),
            tls: TlsConfig::default(),
            keepalive_interval: 60,
            connect_timeout: None,
        }
    }
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("device_id", &self.device_id)
            .field("device_secret", &"<redacted>")
            .finish()
    }
}

impl LinkConfig {
    /// Load configuration from an optional file and environment variables
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };

        config.apply_environment_overrides();

        info!(
            "Link configuration: server={}, tls={}, reconnect_interval={}s",
            config.endpoint(),
            config.tls.enabled,
            config.reconnect_interval
        );

        Ok(config)
    }

    /// Read a YAML file; a missing file yields the defaults
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {:?} not found, using defaults", path);
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config file {:?}", path))
            }
        };

        let config = serde_yaml::from_str::<Self>(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Apply `DEVLINK_*` environment variable overrides
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DEVLINK_HOST") {
            info!("Host overridden by environment: {}", host);
            self.server.host = host;
        }

        if let Some(port) = lookup("DEVLINK_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    self.server.port = Some(port);
                    info!("Port overridden by environment: {}", port);
                }
                Err(_) => warn!("Ignoring invalid DEVLINK_PORT {:?}", port),
            }
        }

        if let Some(secs) = lookup("DEVLINK_RECONNECT_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) => {
                    self.reconnect_interval = secs;
                    info!("Reconnect interval overridden by environment: {}s", secs);
                }
                Err(_) => warn!("Ignoring invalid DEVLINK_RECONNECT_SECS {:?}", secs),
            }
        }

        if let Some(username) = lookup("DEVLINK_USERNAME") {
            self.credentials.username = username;
        }

        if let Some(device_id) = lookup("DEVLINK_DEVICE_ID") {
            self.credentials.device_id = device_id;
        }

        if let Some(secret) = lookup("DEVLINK_DEVICE_SECRET") {
            self.credentials.device_secret = secret;
        }

        if let Some(tls) = lookup("DEVLINK_TLS") {
            self.tls.enabled = matches!(tls.to_lowercase().as_str(), "true" | "1" | "yes");
            info!("TLS overridden by environment: {}", self.tls.enabled);
        }
    }

    /// Reject settings the link cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            bail!("server host must not be empty");
        }
        if self.server.port == Some(0) {
            bail!("server port must not be 0");
        }
        if self.reconnect_interval == 0 {
            bail!("reconnect interval must be at least one second");
        }
        if self.credentials.username.is_empty() {
            bail!("credentials.username must be set");
        }
        if self.credentials.device_id.is_empty() {
            bail!("credentials.device_id must be set");
        }
        Ok(())
    }

    /// Effective server port
    pub fn port(&self) -> u16 {
        match self.server.port {
            Some(port) => port,
            None if self.tls.enabled => DEFAULT_TLS_PORT,
            None => DEFAULT_PLAIN_PORT,
        }
    }

    /// Server endpoint
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.server.host.clone(), self.port())
    }

    /// Reconnect interval as a duration
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }

    /// Keepalive interval as a duration
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval)
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.map(Duration::from_secs)
    }

    /// Session settings for the state machine
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint(),
            reconnect_interval: self.reconnect_interval(),
        }
    }

    /// Credentials presented on every connection
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.credentials.username.as_str(),
            self.credentials.device_id.as_str(),
            self.credentials.device_secret.as_str(),
        )
    }

    /// TLS client options
    #[cfg(feature = "tls")]
    pub fn tls_options(&self) -> link_session::TlsOptions {
        link_session::TlsOptions {
            verify_peer: self.tls.verify_peer,
            ca_file: self.tls.ca_file.clone(),
            server_name: self.tls.server_name.clone(),
        }
    }
}
