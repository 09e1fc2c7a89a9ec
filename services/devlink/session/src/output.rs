//! Output coalescing.
//!
//! Many small logical writes are appended to one growable buffer and leave the
//! process as a single transport write on flush. The buffer keeps its capacity
//! across flushes and reconnects; it is grown exactly to fit, never shrunk.

use crate::transport::{Transport, TransportError};
use tracing::trace;

/// Accumulates outbound bytes until flushed
#[derive(Debug, Default)]
pub struct OutputCoalescer {
    buf: Vec<u8>,
}

impl OutputCoalescer {
    /// Create an empty coalescer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a coalescer with preallocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Append `bytes` to the pending output
    pub fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.buf.reserve_exact(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    /// Send the pending output with exactly one `write_all`.
    ///
    /// Returns the number of bytes sent; an empty buffer sends nothing. The
    /// logical size is reset either way, the capacity is kept.
    pub fn flush(&mut self, transport: &mut dyn Transport) -> Result<usize, TransportError> {
        if self.buf.is_empty() {
            return Ok(0);
        }

        let size = self.buf.len();
        let result = transport.write_all(&self.buf);
        self.buf.clear();

        trace!("Flushed {} bytes (capacity {})", size, self.buf.capacity());
        result.map(|()| size)
    }

    /// Drop pending output, returning how many bytes were discarded
    pub fn discard(&mut self) -> usize {
        let dropped = self.buf.len();
        self.buf.clear();
        dropped
    }

    /// Pending bytes in write order
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Number of pending bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Allocated capacity
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }
}
