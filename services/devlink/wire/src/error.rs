//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Unknown frame type
    #[error("unknown type {0}")]
    Type(u8),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Invalid CBOR metadata
    #[error("cbor meta invalid")]
    Meta,
}
