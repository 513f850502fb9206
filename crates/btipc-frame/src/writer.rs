use std::os::fd::BorrowedFd;

use btipc_transport::SeqPacket;
use bytes::BytesMut;
use tracing::debug;

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Writes complete frames to a sequential-packet socket.
///
/// Each frame is sent as a single record, so concurrent writers never
/// interleave bytes of different frames.
pub struct FrameWriter {
    inner: SeqPacket,
    config: FrameConfig,
}

impl FrameWriter {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: SeqPacket) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: SeqPacket, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Encode and send a payload.
    pub fn send(&self, service_id: u8, opcode: u8, payload: &[u8]) -> Result<()> {
        self.send_with_fd(service_id, opcode, payload, None)
    }

    /// Encode and send a payload, passing `fd` alongside it.
    pub fn send_with_fd(
        &self,
        service_id: u8,
        opcode: u8,
        payload: &[u8],
        fd: Option<BorrowedFd<'_>>,
    ) -> Result<()> {
        let max = self.config.max_payload();
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        let mut buf = BytesMut::new();
        encode_frame(service_id, opcode, payload, &mut buf)?;

        let sent = self.inner.send(&[buf.as_ref()], fd)?;
        if sent == 0 {
            return Err(FrameError::ConnectionClosed);
        }
        if sent != buf.len() {
            return Err(FrameError::ShortSend {
                sent,
                len: buf.len(),
            });
        }

        debug!(
            service_id,
            opcode,
            len = payload.len(),
            fd = fd.is_some(),
            "sent frame"
        );
        Ok(())
    }

    /// Borrow the underlying socket.
    pub fn get_ref(&self) -> &SeqPacket {
        &self.inner
    }

    /// Consume the writer and return the inner socket.
    pub fn into_inner(self) -> SeqPacket {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{parse_header, Header, HEADER_SIZE};

    #[test]
    fn write_single_frame() {
        let (left, right) = SeqPacket::pair().unwrap();
        let writer = FrameWriter::new(left);

        writer.send(1, 0x05, b"hello").unwrap();

        let mut buf = [0u8; 64];
        let received = right.recv(&mut buf).unwrap();
        let (header, payload) = parse_header(&buf[..received.len]).unwrap();
        assert_eq!(header, Header::new(1, 0x05, 5));
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn payload_too_large_rejected() {
        let (left, _right) = SeqPacket::pair().unwrap();
        let writer = FrameWriter::with_config(left, FrameConfig { mtu: HEADER_SIZE + 4 });

        let err = writer.send(1, 1, b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
        writer.send(1, 1, b"fits").unwrap();
    }

    #[test]
    fn send_to_closed_peer_fails() {
        let (left, right) = SeqPacket::pair().unwrap();
        let writer = FrameWriter::new(left);
        drop(right);

        let err = writer.send(1, 1, b"x").unwrap_err();
        assert!(matches!(err, FrameError::Transport(_)));
    }

    #[test]
    fn accessors_and_into_inner() {
        let (left, _right) = SeqPacket::pair().unwrap();
        let writer = FrameWriter::new(left);
        assert_eq!(writer.config().mtu, crate::codec::DEFAULT_MTU);
        let _ = writer.get_ref();
        let _inner = writer.into_inner();
    }
}
