//! Frame encoding and decoding for the stream multiplexer.
//!
//! Every frame starts with a fixed 12-byte header. All multi-byte fields are
//! big-endian (network byte order).
//!
//! ```text
//!  0        1        2        4                 8                 12
//! ┌────────┬────────┬────────┬─────────────────┬─────────────────┬───────────┐
//! │  type  │ flags  │reserved│    stream id    │  length / value │  payload  │
//! └────────┴────────┴────────┴─────────────────┴─────────────────┴───────────┘
//! ```
//!
//! For `Data` frames the last header field is the payload length. For every other
//! frame type it carries a value (window credit, ping nonce, reset or go-away code)
//! and the frame has no payload.

use crate::error::FrameError;

/// Size of the fixed frame header
pub const MUX_HEADER_SIZE: usize = 12;

/// Stream id reserved for session-level frames (ping, go-away)
pub const SESSION_STREAM_ID: u32 = 0;

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Stream payload
    Data = 0x01,
    /// Keepalive
    Ping = 0x05,
    /// Response to PING
    Pong = 0x06,
    /// New stream initiation
    StreamOpen = 0x09,
    /// Sender finished writing (half close)
    StreamClose = 0x0A,
    /// Abort stream in both directions
    StreamReset = 0x0B,
    /// Flow control credit
    WindowUpdate = 0x0C,
    /// Session shutdown
    GoAway = 0x0D,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Data),
            0x05 => Ok(Self::Ping),
            0x06 => Ok(Self::Pong),
            0x09 => Ok(Self::StreamOpen),
            0x0A => Ok(Self::StreamClose),
            0x0B => Ok(Self::StreamReset),
            0x0C => Ok(Self::WindowUpdate),
            0x0D => Ok(Self::GoAway),
            _ => Err(FrameError::InvalidFrameType(value)),
        }
    }
}

/// Frame flags bitmap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Final frame in this direction of the stream
    pub const FIN: u8 = 0b0000_0001;

    /// Create new empty flags
    #[must_use]
    pub fn new() -> Self {
        Self(0)
    }

    /// Add FIN flag
    #[must_use]
    pub fn with_fin(mut self) -> Self {
        self.0 |= Self::FIN;
        self
    }

    /// Check if FIN is set
    #[must_use]
    pub fn is_fin(&self) -> bool {
        self.0 & Self::FIN != 0
    }

    /// Get raw byte value
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame type
    pub frame_type: FrameType,
    /// Flags
    pub flags: FrameFlags,
    /// Stream the frame belongs to
    pub stream_id: u32,
    /// Payload length for `Data`, otherwise the frame's value
    pub value: u32,
}

impl FrameHeader {
    /// Parse a header, rejecting `Data` payloads above `max_payload`.
    ///
    /// # Errors
    ///
    /// Fails on short input, an unknown frame type or an oversized payload.
    pub fn parse(data: &[u8], max_payload: usize) -> Result<Self, FrameError> {
        if data.len() < MUX_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: MUX_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let frame_type = FrameType::try_from(data[0])?;
        let flags = FrameFlags(data[1]);
        let stream_id = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let value = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let header = Self {
            frame_type,
            flags,
            stream_id,
            value,
        };
        if header.payload_len() > max_payload {
            return Err(FrameError::PayloadTooLarge(header.payload_len()));
        }
        Ok(header)
    }

    /// Number of payload bytes following the header.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        match self.frame_type {
            FrameType::Data => self.value as usize,
            _ => 0,
        }
    }

    /// Encode into the fixed header layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; MUX_HEADER_SIZE] {
        let mut buf = [0u8; MUX_HEADER_SIZE];
        buf[0] = self.frame_type as u8;
        buf[1] = self.flags.as_u8();
        buf[4..8].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[8..12].copy_from_slice(&self.value.to_be_bytes());
        buf
    }
}

/// An owned multiplexer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxFrame {
    /// Header
    pub header: FrameHeader,
    /// Payload, empty for everything but `Data`
    pub payload: Vec<u8>,
}

impl MuxFrame {
    fn control(frame_type: FrameType, stream_id: u32, value: u32) -> Self {
        Self {
            header: FrameHeader {
                frame_type,
                flags: FrameFlags::new(),
                stream_id,
                value,
            },
            payload: Vec::new(),
        }
    }

    /// A data frame.
    ///
    /// # Errors
    ///
    /// Fails if the payload does not fit the length field.
    pub fn data(stream_id: u32, payload: Vec<u8>) -> Result<Self, FrameError> {
        let len = u32::try_from(payload.len())
            .map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;
        Ok(Self {
            header: FrameHeader {
                frame_type: FrameType::Data,
                flags: FrameFlags::new(),
                stream_id,
                value: len,
            },
            payload,
        })
    }

    /// Open a stream.
    #[must_use]
    pub fn open(stream_id: u32) -> Self {
        Self::control(FrameType::StreamOpen, stream_id, 0)
    }

    /// Half-close the sender's direction.
    #[must_use]
    pub fn close(stream_id: u32) -> Self {
        let mut frame = Self::control(FrameType::StreamClose, stream_id, 0);
        frame.header.flags = frame.header.flags.with_fin();
        frame
    }

    /// Abort a stream.
    #[must_use]
    pub fn reset(stream_id: u32, code: u32) -> Self {
        Self::control(FrameType::StreamReset, stream_id, code)
    }

    /// Grant `credit` more bytes to the peer.
    #[must_use]
    pub fn window_update(stream_id: u32, credit: u32) -> Self {
        Self::control(FrameType::WindowUpdate, stream_id, credit)
    }

    /// Session keepalive.
    #[must_use]
    pub fn ping(nonce: u32) -> Self {
        Self::control(FrameType::Ping, SESSION_STREAM_ID, nonce)
    }

    /// Answer to a ping.
    #[must_use]
    pub fn pong(nonce: u32) -> Self {
        Self::control(FrameType::Pong, SESSION_STREAM_ID, nonce)
    }

    /// Session shutdown.
    #[must_use]
    pub fn go_away(code: u32) -> Self {
        Self::control(FrameType::GoAway, SESSION_STREAM_ID, code)
    }

    /// Frame type shorthand.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type
    }

    /// Stream id shorthand.
    #[must_use]
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    /// Serialize header and payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MUX_HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse one frame from the front of `data`, returning it and the bytes consumed.
    ///
    /// # Errors
    ///
    /// Fails on a malformed header or when the payload is cut short.
    pub fn decode(data: &[u8], max_payload: usize) -> Result<(Self, usize), FrameError> {
        let header = FrameHeader::parse(data, max_payload)?;
        let len = header.payload_len();
        let body = &data[MUX_HEADER_SIZE..];
        if body.len() < len {
            return Err(FrameError::LengthMismatch {
                declared: len,
                actual: body.len(),
            });
        }
        Ok((
            Self {
                header,
                payload: body[..len].to_vec(),
            },
            MUX_HEADER_SIZE + len,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_frame_roundtrip() {
        let frame = MuxFrame::data(7, b"hello strand".to_vec()).unwrap();
        let bytes = frame.encode();
        assert_eq!(bytes.len(), MUX_HEADER_SIZE + 12);

        let (parsed, used) = MuxFrame::decode(&bytes, 1024).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(parsed, frame);
        assert_eq!(parsed.frame_type(), FrameType::Data);
        assert_eq!(parsed.stream_id(), 7);
    }

    #[test]
    fn test_header_layout() {
        let bytes = MuxFrame::window_update(0x0102_0304, 0x8000).encode();
        assert_eq!(
            bytes,
            vec![0x0C, 0, 0, 0, 0x01, 0x02, 0x03, 0x04, 0, 0, 0x80, 0]
        );
    }

    #[test]
    fn test_control_frames_have_no_payload() {
        for frame in [
            MuxFrame::open(1),
            MuxFrame::close(1),
            MuxFrame::reset(1, 2),
            MuxFrame::ping(9),
            MuxFrame::go_away(0),
        ] {
            let bytes = frame.encode();
            assert_eq!(bytes.len(), MUX_HEADER_SIZE);
            let (parsed, _) = MuxFrame::decode(&bytes, 0).unwrap();
            assert_eq!(parsed, frame);
        }
        assert!(MuxFrame::close(3).header.flags.is_fin());
    }

    #[test]
    fn test_frame_too_short() {
        assert!(matches!(
            FrameHeader::parse(&[0u8; 5], 16),
            Err(FrameError::TooShort { .. })
        ));
    }

    #[test]
    fn test_invalid_frame_type() {
        let mut bytes = MuxFrame::open(1).encode();
        bytes[0] = 0x42;
        assert_eq!(
            MuxFrame::decode(&bytes, 16),
            Err(FrameError::InvalidFrameType(0x42))
        );
    }

    #[test]
    fn test_payload_limits() {
        let bytes = MuxFrame::data(1, vec![0u8; 64]).unwrap().encode();
        assert_eq!(
            MuxFrame::decode(&bytes, 32),
            Err(FrameError::PayloadTooLarge(64))
        );
        assert!(matches!(
            MuxFrame::decode(&bytes[..40], 64),
            Err(FrameError::LengthMismatch { declared: 64, .. })
        ));
    }
}
