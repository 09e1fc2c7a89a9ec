//! Borrowed view of a live link handed to the authenticator and protocol peer.

use crate::output::OutputCoalescer;
use crate::stats::LinkStats;
use crate::transport::{Transport, TransportError};

/// Read and buffered-write access to the current connection.
///
/// The first failed read or flush marks the link broken: later calls fail
/// with `NotConnected` and the state machine tears the connection down as soon
/// as control returns to it.
pub struct LinkIo<'a> {
    transport: &'a mut dyn Transport,
    output: &'a mut OutputCoalescer,
    stats: &'a mut LinkStats,
    broken: bool,
}

impl<'a> LinkIo<'a> {
    pub(crate) fn new(
        transport: &'a mut dyn Transport,
        output: &'a mut OutputCoalescer,
        stats: &'a mut LinkStats,
    ) -> Self {
        Self {
            transport,
            output,
            stats,
            broken: false,
        }
    }

    /// Read exactly `buf.len()` bytes
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        if self.broken {
            return Err(TransportError::NotConnected);
        }
        match self.transport.read_exact(buf) {
            Ok(()) => {
                self.stats.bytes_in += buf.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    /// Buffer `bytes` for the next flush
    pub fn write(&mut self, bytes: &[u8]) {
        if !self.broken {
            self.output.write(bytes);
        }
    }

    /// Send everything buffered as one transport write
    pub fn flush(&mut self) -> Result<(), TransportError> {
        if self.broken {
            return Err(TransportError::NotConnected);
        }
        match self.output.flush(&mut *self.transport) {
            Ok(sent) => {
                self.stats.bytes_out += sent as u64;
                Ok(())
            }
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    /// Append `bytes` and flush immediately
    pub fn write_flush(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.write(bytes);
        self.flush()
    }

    /// Bytes buffered but not yet flushed
    pub fn pending(&self) -> usize {
        self.output.len()
    }

    /// Whether a read or flush has failed on this link
    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    #[test]
    fn test_counts_bytes_in_and_out() {
        let mut transport = MockTransport::connected();
        transport.inbound.extend(b"hello");
        let mut output = OutputCoalescer::new();
        let mut stats = LinkStats::default();

        let mut io = LinkIo::new(&mut transport, &mut output, &mut stats);
        let mut buf = [0u8; 5];
        io.read_exact(&mut buf).unwrap();
        io.write(b"ab");
        io.write(b"c");
        assert_eq!(io.pending(), 3);
        io.flush().unwrap();
        assert!(!io.is_broken());

        assert_eq!(stats.bytes_in, 5);
        assert_eq!(stats.bytes_out, 3);
        assert_eq!(transport.writes, vec![b"abc".to_vec()]);
    }

    #[test]
    fn test_failed_read_breaks_the_link() {
        let mut transport = MockTransport::connected();
        transport.inbound.extend([0u8; 7]);
        let mut output = OutputCoalescer::new();
        let mut stats = LinkStats::default();

        let mut io = LinkIo::new(&mut transport, &mut output, &mut stats);
        let mut buf = [0u8; 10];
        assert!(matches!(
            io.read_exact(&mut buf),
            Err(TransportError::ShortRead { expected: 10, read: 7 })
        ));
        assert!(io.is_broken());
        assert!(matches!(io.flush(), Err(TransportError::NotConnected)));
        io.write(b"ignored");
        assert_eq!(io.pending(), 0);
    }

    #[test]
    fn test_failed_flush_breaks_the_link() {
        let mut transport = MockTransport::connected();
        transport.fail_writes = true;
        let mut output = OutputCoalescer::new();
        let mut stats = LinkStats::default();

        let mut io = LinkIo::new(&mut transport, &mut output, &mut stats);
        assert!(io.write_flush(b"x").is_err());
        assert!(io.is_broken());
        assert_eq!(stats.bytes_out, 0);
    }
}
