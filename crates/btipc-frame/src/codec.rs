use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::service::{is_event, is_valid_service};

/// Frame header: service (1) + opcode (1) + length (2) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Default maximum record size (header + payload) on either channel.
pub const DEFAULT_MTU: usize = 1024;

/// Fixed header present on every frame of both channels.
///
/// Wire format:
/// ```text
/// ┌────────────┬───────────┬────────────┬──────────────────┐
/// │ Service    │ Opcode    │ Length     │ Payload          │
/// │ (1B)       │ (1B)      │ (2B LE)    │ (Length bytes)   │
/// └────────────┴───────────┴────────────┴──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub service_id: u8,
    pub opcode: u8,
    /// Payload length in bytes.
    pub len: u16,
}

impl Header {
    pub fn new(service_id: u8, opcode: u8, len: u16) -> Self {
        Self {
            service_id,
            opcode,
            len,
        }
    }

    /// Encode the header into its wire representation.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let len = self.len.to_le_bytes();
        [self.service_id, self.opcode, len[0], len[1]]
    }

    /// Decode the header fields from the start of `src` without validating
    /// them against the rest of the frame.
    pub fn decode(src: &[u8]) -> Result<Self> {
        match src {
            [service_id, opcode, lo, hi, ..] => Ok(Self {
                service_id: *service_id,
                opcode: *opcode,
                len: u16::from_le_bytes([*lo, *hi]),
            }),
            _ => Err(FrameError::TooShort { len: src.len() }),
        }
    }

    /// Reject opcodes below the event threshold (notification channel only).
    pub fn ensure_event(&self) -> Result<()> {
        if is_event(self.opcode) {
            Ok(())
        } else {
            Err(FrameError::NotAnEvent {
                service_id: self.service_id,
                opcode: self.opcode,
            })
        }
    }
}

/// Validate a complete received frame and split off its payload.
///
/// Fails when the buffer is shorter than the header, when the frame length is
/// not exactly `HEADER_SIZE + len`, or when the service id is out of range.
pub fn parse_header(buf: &[u8]) -> Result<(Header, &[u8])> {
    let header = Header::decode(buf)?;

    if buf.len() != HEADER_SIZE + header.len as usize {
        return Err(FrameError::LengthMismatch {
            len: buf.len(),
            declared: header.len,
        });
    }

    if !is_valid_service(header.service_id) {
        return Err(FrameError::UnknownService(header.service_id));
    }

    Ok((header, &buf[HEADER_SIZE..]))
}

/// Encode a frame into the wire format.
pub fn encode_frame(service_id: u8, opcode: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u16::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&Header::new(service_id, opcode, len).encode());
    dst.put_slice(payload);
    Ok(())
}

/// An owned frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub service_id: u8,
    pub opcode: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(service_id: u8, opcode: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            service_id,
            opcode,
            payload: payload.into(),
        }
    }
}

/// Configuration for frame I/O.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest record (header + payload) sent or received. Default: 1024.
    pub mtu: usize,
}

impl FrameConfig {
    /// Largest payload that fits in one record.
    pub fn max_payload(&self) -> usize {
        self.mtu
            .saturating_sub(HEADER_SIZE)
            .min(u16::MAX as usize)
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self { mtu: DEFAULT_MTU }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{BLUETOOTH, MINIMUM_EVENT, SERVICE_ID_MAX};

    #[test]
    fn test_header_roundtrip() {
        for header in [
            Header::new(0, 0, 0),
            Header::new(BLUETOOTH, MINIMUM_EVENT, 4),
            Header::new(SERVICE_ID_MAX, 0xff, u16::MAX),
        ] {
            assert_eq!(Header::decode(&header.encode()).unwrap(), header);
        }
    }

    #[test]
    fn test_length_is_little_endian() {
        assert_eq!(Header::new(2, 7, 0x0102).encode(), [2, 7, 0x02, 0x01]);
    }

    #[test]
    fn test_encode_parse() {
        let mut buf = BytesMut::new();
        encode_frame(BLUETOOTH, 0x03, b"\x01\x02\x03", &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 3);

        let (header, payload) = parse_header(&buf).unwrap();
        assert_eq!(header, Header::new(BLUETOOTH, 0x03, 3));
        assert_eq!(payload, b"\x01\x02\x03");
    }

    #[test]
    fn test_parse_too_short() {
        let result = parse_header(&[1, 2, 0]);
        assert!(matches!(result, Err(FrameError::TooShort { len: 3 })));
    }

    #[test]
    fn test_parse_length_mismatch() {
        let mut buf = BytesMut::new();
        encode_frame(1, 0x81, b"abcd", &mut buf).unwrap();

        let short = &buf[..buf.len() - 1];
        assert!(matches!(
            parse_header(short),
            Err(FrameError::LengthMismatch { declared: 4, .. })
        ));

        buf.put_u8(0);
        assert!(matches!(
            parse_header(&buf),
            Err(FrameError::LengthMismatch { declared: 4, .. })
        ));
    }

    #[test]
    fn test_parse_unknown_service() {
        let buf = Header::new(SERVICE_ID_MAX + 1, 0x81, 0).encode();
        assert!(matches!(
            parse_header(&buf),
            Err(FrameError::UnknownService(id)) if id == SERVICE_ID_MAX + 1
        ));
    }

    #[test]
    fn test_ensure_event() {
        assert!(Header::new(1, MINIMUM_EVENT, 0).ensure_event().is_ok());
        assert!(matches!(
            Header::new(1, MINIMUM_EVENT - 1, 0).ensure_event(),
            Err(FrameError::NotAnEvent { .. })
        ));
    }

    #[test]
    fn test_encode_payload_too_large() {
        let mut buf = BytesMut::new();
        let payload = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(
            encode_frame(1, 1, &payload, &mut buf),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = BytesMut::new();
        encode_frame(0, 1, b"", &mut buf).unwrap();

        let (header, payload) = parse_header(&buf).unwrap();
        assert_eq!(header.len, 0);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_max_payload_from_mtu() {
        assert_eq!(FrameConfig::default().max_payload(), DEFAULT_MTU - HEADER_SIZE);
        assert_eq!(FrameConfig { mtu: 2 }.max_payload(), 0);
    }
}
