/// Errors that can occur during frame encoding/decoding.
///
/// Every variant except [`FrameError::PayloadTooLarge`] on the send path means
/// the channel can no longer be trusted.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame is shorter than the fixed header.
    #[error("message too small ({len} bytes)")]
    TooShort { len: usize },

    /// The declared payload length does not match the bytes received.
    #[error("message malformed ({len} bytes, header declares {declared} byte payload)")]
    LengthMismatch { len: usize, declared: u16 },

    /// The service id exceeds the highest known service.
    #[error("unknown service (0x{0:02x})")]
    UnknownService(u8),

    /// A non-event opcode arrived on the notification channel.
    #[error("invalid event opcode 0x{opcode:02x} for service 0x{service_id:02x}")]
    NotAnEvent { service_id: u8, opcode: u8 },

    /// The record did not fit the receive buffer and was cut by the kernel.
    #[error("message truncated (larger than {mtu} byte MTU)")]
    Truncated { mtu: usize },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The kernel accepted fewer bytes than the frame holds.
    #[error("short send ({sent} of {len} bytes)")]
    ShortSend { sent: usize, len: usize },

    /// Transport-level error while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Transport(#[from] btipc_transport::TransportError),

    /// The peer closed the connection (zero-length read).
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
