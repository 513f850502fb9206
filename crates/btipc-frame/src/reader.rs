use std::os::fd::OwnedFd;

use btipc_transport::SeqPacket;
use bytes::Bytes;
use tracing::debug;

use crate::codec::{parse_header, FrameConfig, Header};
use crate::error::{FrameError, Result};

/// A validated frame as received, with any descriptor that rode along.
#[derive(Debug)]
pub struct ReceivedFrame {
    pub header: Header,
    pub payload: Bytes,
    /// Ancillary descriptor; closed when dropped unless the caller takes it.
    pub fd: Option<OwnedFd>,
}

/// Reads complete frames from a sequential-packet socket.
///
/// Each record is one frame; a record that fails validation is an error and
/// the caller must treat the channel as broken.
pub struct FrameReader {
    inner: SeqPacket,
    buf: Vec<u8>,
    config: FrameConfig,
}

impl FrameReader {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: SeqPacket) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: SeqPacket, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: vec![0u8; config.mtu],
            config,
        }
    }

    /// Read the next frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` on a zero-length read.
    pub fn read_frame(&mut self) -> Result<ReceivedFrame> {
        let received = self.inner.recv(&mut self.buf)?;

        if received.len == 0 {
            return Err(FrameError::ConnectionClosed);
        }

        if received.truncated {
            return Err(FrameError::Truncated {
                mtu: self.config.mtu,
            });
        }

        let (header, payload) = parse_header(&self.buf[..received.len])?;
        debug!(
            service_id = header.service_id,
            opcode = header.opcode,
            len = header.len,
            fd = received.fd.is_some(),
            "received frame"
        );

        Ok(ReceivedFrame {
            header,
            payload: Bytes::copy_from_slice(payload),
            fd: received.fd,
        })
    }

    /// Borrow the underlying socket.
    pub fn get_ref(&self) -> &SeqPacket {
        &self.inner
    }

    /// Consume the reader and return the inner socket.
    pub fn into_inner(self) -> SeqPacket {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
