//! Frame format for the reference device protocol carried over a devlink session.
//!
//! The connection core treats the application protocol as an opaque byte
//! stream. This crate defines the small protocol the `devlink` binary speaks
//! on top of it: a credential handshake, keepalives and opaque data frames.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u8 frame_type        | see FrameType              |
//! +----------------------+----------------------------+
//! | u32 payload_len      | big-endian, <= 1 MiB       |
//! +----------------------+----------------------------+
//! | payload              | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```
//!
//! The `Auth` payload is a canonical CBOR map of byte strings
//! (`username`, `device`, `secret`).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod error;
pub mod frame;

// Re-export main types
pub use auth::AuthRequest;
pub use error::WireError;
pub use frame::{Frame, FrameHeader, FrameType, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};
