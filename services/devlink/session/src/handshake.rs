//! Credential handshake for the reference device protocol.

use crate::error::SessionError;
use crate::io::LinkIo;
use crate::peer::{Authenticator, Credentials};
use bytes::Bytes;
use link_wire::{AuthRequest, Frame, FrameHeader, FrameType, FRAME_HEADER_SIZE};
use tracing::debug;

/// Read one whole frame from the link
pub fn read_frame(io: &mut LinkIo<'_>) -> Result<Frame, SessionError> {
    let mut raw = [0u8; FRAME_HEADER_SIZE];
    io.read_exact(&mut raw)?;
    let header = FrameHeader::decode(&raw)?;

    let mut payload = vec![0u8; header.len as usize];
    if !payload.is_empty() {
        io.read_exact(&mut payload)?;
    }

    Ok(Frame::new(header.typ, Bytes::from(payload)))
}

/// Buffer one frame for the next flush
pub fn send_frame(io: &mut LinkIo<'_>, frame: &Frame) -> Result<(), SessionError> {
    let encoded = frame.encode()?;
    io.write(&encoded);
    Ok(())
}

/// Sends an `Auth` frame and waits for the verdict.
///
/// Only `AuthOk` is accepted; `AuthFail`, any other frame or an I/O error is
/// a rejection.
#[derive(Debug, Default, Clone, Copy)]
pub struct CredentialHandshake;

impl CredentialHandshake {
    /// Create the handshake
    pub fn new() -> Self {
        Self
    }
}

impl Authenticator for CredentialHandshake {
    fn authenticate(
        &mut self,
        io: &mut LinkIo<'_>,
        credentials: &Credentials,
    ) -> Result<(), SessionError> {
        let request = AuthRequest {
            username: credentials.username().to_vec(),
            device: credentials.device_id().to_vec(),
            secret: credentials.device_secret().to_vec(),
        };
        send_frame(io, &Frame::new(FrameType::Auth, request.encode()?))?;
        io.flush()?;

        let reply = read_frame(io)?;
        match reply.typ {
            FrameType::AuthOk => Ok(()),
            FrameType::AuthFail => {
                debug!("Server rejected credentials");
                Err(SessionError::AuthFailed)
            }
            other => {
                debug!("Unexpected {:?} frame during authentication", other);
                Err(SessionError::AuthFailed)
            }
        }
    }
}
