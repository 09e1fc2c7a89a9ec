//! Frame header and frame encoding.

use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Encoded header size: type byte plus big-endian payload length
pub const FRAME_HEADER_SIZE: usize = 5;

/// Largest payload a peer may announce (1 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Frame types as defined in the wire protocol
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Credential presentation, client to server
    Auth = 0x01,
    /// Credentials accepted
    AuthOk = 0x02,
    /// Credentials rejected
    AuthFail = 0x03,
    /// Keepalive probe, either direction
    KeepAlive = 0x04,
    /// Answer to a keepalive probe
    KeepAliveAck = 0x05,
    /// Opaque application data
    Data = 0x06,
}

impl TryFrom<u8> for FrameType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameType::Auth),
            0x02 => Ok(FrameType::AuthOk),
            0x03 => Ok(FrameType::AuthFail),
            0x04 => Ok(FrameType::KeepAlive),
            0x05 => Ok(FrameType::KeepAliveAck),
            0x06 => Ok(FrameType::Data),
            _ => Err(WireError::Type(value)),
        }
    }
}

/// Fixed-size frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame type
    pub typ: FrameType,
    /// Length of the payload that follows the header
    pub len: u32,
}

impl FrameHeader {
    /// Decode a header, validating the type and the announced length
    pub fn decode(raw: &[u8; FRAME_HEADER_SIZE]) -> Result<Self, WireError> {
        let typ = FrameType::try_from(raw[0])?;
        let len = u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]);
        if len as usize > MAX_PAYLOAD_SIZE {
            return Err(WireError::Size(len as usize));
        }
        Ok(Self { typ, len })
    }

    /// Encode the header into `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.typ as u8);
        buf.put_u32(self.len);
    }
}

/// Complete wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type
    pub typ: FrameType,
    /// Payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame
    pub fn new(typ: FrameType, payload: Bytes) -> Self {
        Self { typ, payload }
    }

    /// Create a frame without payload
    pub fn empty(typ: FrameType) -> Self {
        Self::new(typ, Bytes::new())
    }

    /// Get the total frame size when encoded
    pub fn encoded_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Encode frame to a contiguous buffer
    pub fn encode(&self) -> Result<Bytes, WireError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WireError::Size(self.payload.len()));
        }

        let mut buf = BytesMut::with_capacity(self.encoded_size());
        FrameHeader {
            typ: self.typ,
            len: self.payload.len() as u32,
        }
        .encode(&mut buf);
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }

    /// Decode one frame from the front of a buffer.
    ///
    /// Returns `Ok(None)` until the whole frame is buffered.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut raw = [0u8; FRAME_HEADER_SIZE];
        raw.copy_from_slice(&buf[..FRAME_HEADER_SIZE]);
        let header = FrameHeader::decode(&raw)?;

        let total = FRAME_HEADER_SIZE + header.len as usize;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(header.len as usize).freeze();
        Ok(Some(Frame::new(header.typ, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = Frame::new(FrameType::Data, Bytes::from_static(b"abc"));
        let encoded = frame.encode().unwrap();
        assert_eq!(&encoded[..], &[0x06, 0, 0, 0, 3, b'a', b'b', b'c']);
        assert_eq!(encoded.len(), frame.encoded_size());
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let encoded = Frame::new(FrameType::KeepAlive, Bytes::from_static(b"xy"))
            .encode()
            .unwrap();

        let mut buf = BytesMut::from(&encoded[..4]);
        assert_eq!(Frame::decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&encoded[4..]);
        let frame = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.typ, FrameType::KeepAlive);
        assert_eq!(&frame.payload[..], b"xy");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_two_frames_back_to_back() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Frame::empty(FrameType::AuthOk).encode().unwrap());
        buf.extend_from_slice(&Frame::empty(FrameType::KeepAliveAck).encode().unwrap());

        assert_eq!(Frame::decode(&mut buf).unwrap().unwrap().typ, FrameType::AuthOk);
        assert_eq!(
            Frame::decode(&mut buf).unwrap().unwrap().typ,
            FrameType::KeepAliveAck
        );
        assert_eq!(Frame::decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_header_rejects_unknown_type() {
        let raw = [0x7f, 0, 0, 0, 0];
        assert_eq!(FrameHeader::decode(&raw), Err(WireError::Type(0x7f)));
    }

    #[test]
    fn test_header_rejects_oversized_payload() {
        let len = (MAX_PAYLOAD_SIZE as u32 + 1).to_be_bytes();
        let raw = [0x06, len[0], len[1], len[2], len[3]];
        assert_eq!(
            FrameHeader::decode(&raw),
            Err(WireError::Size(MAX_PAYLOAD_SIZE + 1))
        );
    }
}
