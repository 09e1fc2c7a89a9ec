//! TCP and TLS transport for device links.
//!
//! A [`Transport`] owns at most one live connection. Both variants resolve the
//! endpoint, create the socket with `socket2`, connect, and enable TCP no-delay;
//! the TLS variant then runs a rustls handshake over the connected socket.

use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Default server port for plaintext links
pub const DEFAULT_PLAIN_PORT: u16 = 25200;

/// Default server port for TLS links
pub const DEFAULT_TLS_PORT: u16 = 25202;

/// Remote endpoint of a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP literal
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// DNS resolution produced no usable address
    #[error("failed to resolve {host}: {reason}")]
    ResolutionFailed {
        /// Host that failed to resolve
        host: String,
        /// Resolver message
        reason: String,
    },

    /// The socket could not be created
    #[error("failed to create socket: {0}")]
    SocketCreateFailed(#[source] io::Error),

    /// The TCP handshake failed
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        /// Address that refused or timed out
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The TLS handshake failed
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// Fewer bytes than requested could be read
    #[error("short read: expected {expected} bytes, got {read}")]
    ShortRead {
        /// Requested byte count
        expected: usize,
        /// Bytes read before EOF or error
        read: usize,
    },

    /// Fewer bytes than requested could be written
    #[error("short write: expected {expected} bytes, wrote {written}")]
    ShortWrite {
        /// Requested byte count
        expected: usize,
        /// Bytes accepted before the error
        written: usize,
    },

    /// I/O attempted on a closed transport
    #[error("transport is not connected")]
    NotConnected,

    /// Waiting for readability failed
    #[error("readability wait failed: {0}")]
    WaitFailed(#[source] io::Error),

    /// The TLS client configuration could not be built
    #[error("invalid TLS configuration: {0}")]
    TlsConfig(String),
}

impl TransportError {
    /// Whether the failure was a connect timeout
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectFailed { source, .. } if source.kind() == io::ErrorKind::TimedOut
        )
    }
}

/// Byte-stream endpoint holding zero or one live connection.
///
/// Implementations must make `close` idempotent and must release any previous
/// connection before `connect` opens a new one.
pub trait Transport {
    /// Resolve, connect and (for TLS) handshake with `endpoint`
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError>;

    /// Fill `buf` completely; anything less is a `ShortRead`
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Write all of `bytes`; anything less is a `ShortWrite`
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for inbound data. EOF counts as readable.
    fn wait_readable(&mut self, timeout: Duration) -> Result<bool, TransportError>;

    /// Release the connection, if any
    fn close(&mut self);

    /// Whether a live connection is held
    fn is_open(&self) -> bool;
}

/// Resolve `endpoint` and connect to the first address that accepts.
///
/// TCP no-delay is enabled on the returned stream; failing to set it is only
/// logged.
pub fn connect_tcp(
    endpoint: &Endpoint,
    connect_timeout: Option<Duration>,
) -> Result<TcpStream, TransportError> {
    connect_with(endpoint, connect_timeout, |addr| {
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
    })
}

fn connect_with<F>(
    endpoint: &Endpoint,
    connect_timeout: Option<Duration>,
    mut new_socket: F,
) -> Result<TcpStream, TransportError>
where
    F: FnMut(SocketAddr) -> io::Result<Socket>,
{
    let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| TransportError::ResolutionFailed {
            host: endpoint.host.clone(),
            reason: e.to_string(),
        })?
        .collect();

    let mut last_err = TransportError::ResolutionFailed {
        host: endpoint.host.clone(),
        reason: "no addresses".to_string(),
    };

    for addr in addrs {
        let socket = new_socket(addr).map_err(TransportError::SocketCreateFailed)?;

        debug!("Connecting to {} ({})", endpoint, addr);
        let result = match connect_timeout {
            Some(timeout) => socket.connect_timeout(&addr.into(), timeout),
            None => socket.connect(&addr.into()),
        };

        match result {
            Ok(()) => {
                let stream: TcpStream = socket.into();
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Cannot set TCP_NODELAY on {}: {}", addr, e);
                }
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_err = TransportError::ConnectFailed { addr, source: e };
            }
        }
    }

    Err(last_err)
}

/// Read until `buf` is full, stopping at the first EOF or error
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    let expected = buf.len();
    let mut read = 0;

    while read < expected {
        match reader.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Read failed after {} of {} bytes: {}", read, expected, e);
                break;
            }
        }
    }

    trace!("Read {} of {} bytes", read, expected);
    if read == expected {
        Ok(())
    } else {
        Err(TransportError::ShortRead { expected, read })
    }
}

/// Write all of `bytes` and flush, stopping at the first error
fn write_full<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), TransportError> {
    let expected = bytes.len();
    let mut written = 0;

    while written < expected {
        match writer.write(&bytes[written..]) {
            Ok(0) => break,
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Write failed after {} of {} bytes: {}", written, expected, e);
                break;
            }
        }
    }

    if written == expected {
        if let Err(e) = writer.flush() {
            debug!("Flush failed after writing {} bytes: {}", written, e);
            return Err(TransportError::ShortWrite { expected, written });
        }
        trace!("Wrote {} bytes", written);
        Ok(())
    } else {
        Err(TransportError::ShortWrite { expected, written })
    }
}

/// Peek the socket with a read timeout to find out whether data is pending
fn wait_for_data(stream: &TcpStream, timeout: Duration) -> io::Result<bool> {
    // a zero read timeout is rejected by the OS
    let timeout = timeout.max(Duration::from_millis(1));
    stream.set_read_timeout(Some(timeout))?;

    let mut byte = [0u8; 1];
    let result = stream.peek(&mut byte);
    stream.set_read_timeout(None)?;

    match result {
        Ok(_) => Ok(true),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ) =>
        {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Plain TCP transport
#[derive(Debug, Default)]
pub struct PlainTransport {
    stream: Option<TcpStream>,
    connect_timeout: Option<Duration>,
}

impl PlainTransport {
    /// Create a closed transport with blocking connects
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the TCP handshake; `None` blocks until the OS gives up
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Transport for PlainTransport {
    fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
        self.close();
        self.stream = Some(connect_tcp(endpoint, self.connect_timeout)?);
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        read_full(stream, buf)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        write_full(stream, bytes)
    }

    fn wait_readable(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        let stream = self.stream.as_ref().ok_or(TransportError::NotConnected)?;
        wait_for_data(stream, timeout).map_err(TransportError::WaitFailed)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("Closing socket");
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

// TLS-specific functionality
#[cfg(feature = "tls")]
/// TLS transport over rustls with a fixed cipher preference
pub mod tls {
    use super::*;
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{
        ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme,
        StreamOwned, SupportedCipherSuite,
    };
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Instant;

    /// Client-side TLS options
    #[derive(Debug, Clone, Default)]
    pub struct TlsOptions {
        /// Validate the server certificate chain. Off by default.
        pub verify_peer: bool,
        /// PEM bundle of trusted roots; Mozilla roots when absent
        pub ca_file: Option<PathBuf>,
        /// SNI / verification name; the endpoint host when absent
        pub server_name: Option<String>,
    }

    /// Cipher suites in preference order: AEAD only, forward secret only
    pub fn preferred_cipher_suites() -> Vec<SupportedCipherSuite> {
        vec![
            ring::cipher_suite::TLS13_AES_256_GCM_SHA384,
            ring::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
            ring::cipher_suite::TLS13_AES_128_GCM_SHA256,
            ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
            ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
            ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
            ring::cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
            ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            ring::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
        ]
    }

    /// Create the TLS client configuration: TLS 1.3 and 1.2 only, fixed
    /// cipher order, chain validation only when `verify_peer` is set
    pub fn make_client_config(options: &TlsOptions) -> Result<ClientConfig, TransportError> {
        let provider = Arc::new(CryptoProvider {
            cipher_suites: preferred_cipher_suites(),
            ..ring::default_provider()
        });

        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
            .map_err(|e| TransportError::TlsConfig(e.to_string()))?;

        let config = if options.verify_peer {
            let roots = load_roots(options.ca_file.as_deref())?;
            debug!("TLS peer verification enabled with {} roots", roots.len());
            builder.with_root_certificates(roots).with_no_client_auth()
        } else {
            debug!("TLS peer verification disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipChainVerification { provider }))
                .with_no_client_auth()
        };

        Ok(config)
    }

    fn load_roots(ca_file: Option<&Path>) -> Result<RootCertStore, TransportError> {
        let mut roots = RootCertStore::empty();

        let Some(path) = ca_file else {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            return Ok(roots);
        };

        let pem = std::fs::read(path).map_err(|e| {
            TransportError::TlsConfig(format!("cannot read CA file {}: {}", path.display(), e))
        })?;

        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| {
                TransportError::TlsConfig(format!("cannot parse CA file {}: {}", path.display(), e))
            })?;
            roots
                .add(cert)
                .map_err(|e| TransportError::TlsConfig(format!("rejected CA certificate: {}", e)))?;
        }

        if roots.is_empty() {
            return Err(TransportError::TlsConfig(format!(
                "no certificates found in {}",
                path.display()
            )));
        }

        Ok(roots)
    }

    /// Accepts any certificate chain but still checks handshake signatures
    /// against the presented certificate
    #[derive(Debug)]
    struct SkipChainVerification {
        provider: Arc<CryptoProvider>,
    }

    impl ServerCertVerifier for SkipChainVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.provider
                .signature_verification_algorithms
                .supported_schemes()
        }
    }

    /// TLS-wrapped TCP transport
    pub struct TlsTransport {
        config: Arc<ClientConfig>,
        server_name: Option<String>,
        connect_timeout: Option<Duration>,
        stream: Option<StreamOwned<ClientConnection, TcpStream>>,
    }

    impl fmt::Debug for TlsTransport {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("TlsTransport")
                .field("server_name", &self.server_name)
                .field("connect_timeout", &self.connect_timeout)
                .field("open", &self.stream.is_some())
                .finish()
        }
    }

    impl TlsTransport {
        /// Create a closed TLS transport
        pub fn new(options: &TlsOptions) -> Result<Self, TransportError> {
            Ok(Self {
                config: Arc::new(make_client_config(options)?),
                server_name: options.server_name.clone(),
                connect_timeout: None,
                stream: None,
            })
        }

        /// Bound the TCP handshake; `None` blocks until the OS gives up
        pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
            self.connect_timeout = timeout;
            self
        }
    }

    impl Transport for TlsTransport {
        fn connect(&mut self, endpoint: &Endpoint) -> Result<(), TransportError> {
            self.close();

            let mut sock = connect_tcp(endpoint, self.connect_timeout)?;

            let name = self
                .server_name
                .clone()
                .unwrap_or_else(|| endpoint.host.clone());
            let server_name = ServerName::try_from(name.clone())
                .map_err(|_| TransportError::HandshakeFailed(format!("invalid server name: {}", name)))?;

            let mut conn = ClientConnection::new(self.config.clone(), server_name)
                .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;

            // locals drop in reverse order: the TLS session goes before the socket
            while conn.is_handshaking() {
                conn.complete_io(&mut sock)
                    .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
            }

            debug!(
                "TLS session established with {} ({:?}, {:?})",
                endpoint,
                conn.protocol_version(),
                conn.negotiated_cipher_suite().map(|suite| suite.suite())
            );

            self.stream = Some(StreamOwned::new(conn, sock));
            Ok(())
        }

        fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
            let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
            read_full(stream, buf)
        }

        fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
            write_full(stream, bytes)
        }

        fn wait_readable(&mut self, timeout: Duration) -> Result<bool, TransportError> {
            let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
            let deadline = Instant::now() + timeout;

            // only application data or the peer's close counts; session
            // tickets and other post-handshake records are consumed here
            loop {
                let state = stream.conn.process_new_packets().map_err(|e| {
                    TransportError::WaitFailed(io::Error::new(io::ErrorKind::InvalidData, e))
                })?;
                if state.plaintext_bytes_to_read() > 0 || state.peer_has_closed() {
                    return Ok(true);
                }

                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(false);
                }
                if !wait_for_data(&stream.sock, remaining).map_err(TransportError::WaitFailed)? {
                    return Ok(false);
                }

                match stream.conn.read_tls(&mut stream.sock) {
                    // EOF without close_notify; the next read reports it
                    Ok(0) => return Ok(true),
                    Ok(n) => trace!("Buffered {} TLS bytes", n),
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                        ) => {}
                    Err(e) => return Err(TransportError::WaitFailed(e)),
                }
            }
        }

        fn close(&mut self) {
            if let Some(StreamOwned { mut conn, mut sock }) = self.stream.take() {
                debug!("Closing TLS session");
                conn.send_close_notify();
                let _ = conn.write_tls(&mut sock);
                drop(conn);

                debug!("Closing socket");
                let _ = sock.shutdown(Shutdown::Both);
                drop(sock);
            }
        }

        fn is_open(&self) -> bool {
            self.stream.is_some()
        }
    }
}
