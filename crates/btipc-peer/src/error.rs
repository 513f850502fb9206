use btipc_frame::FrameError;
use btipc_transport::TransportError;

use crate::registry::PayloadLength;

/// Reasons a frame cannot be routed to a handler.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("service {0} is out of range")]
    InvalidService(u8),

    #[error("service {0} is not registered")]
    Unregistered(u8),

    #[error("opcode 0x{opcode:02x} is below 0x{base:02x} for service {service_id}")]
    OpcodeBelowBase { service_id: u8, opcode: u8, base: u8 },

    #[error("no handler for opcode 0x{opcode:02x} on service {service_id}")]
    UnknownOpcode { service_id: u8, opcode: u8 },

    #[error("invalid payload length {len} for service {service_id} opcode 0x{opcode:02x} (expected {expected})")]
    InvalidLength {
        service_id: u8,
        opcode: u8,
        len: usize,
        expected: PayloadLength,
    },
}

/// Errors that can occur while establishing or using a session.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Transport-level error before a session exists (bind, listen, connect).
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Accepting one of the two daemon connections failed.
    #[error("accepting {channel} channel failed: {source}")]
    Accept {
        channel: &'static str,
        #[source]
        source: TransportError,
    },

    /// The peer activation trigger failed.
    #[error("peer activation failed: {0}")]
    Activation(#[source] std::io::Error),

    /// The notification listener thread could not be started.
    #[error("failed to spawn notification listener: {0}")]
    Spawn(#[source] std::io::Error),

    /// Frame-level error on an established channel.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A received frame could not be routed.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// An event handler panicked on the notification thread.
    #[error("event handler for service {service_id} opcode 0x{opcode:02x} panicked")]
    HandlerPanicked { service_id: u8, opcode: u8 },

    /// The peer answered in a way the protocol does not allow.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The caller asked for something that can never be put on the wire.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The session has been torn down.
    #[error("session closed")]
    SessionClosed,
}

impl IpcError {
    /// Returns true for errors that leave the channel in an unknown state.
    ///
    /// A fatal error tears the session down; every later call fails with
    /// [`IpcError::SessionClosed`].
    pub fn is_fatal(&self) -> bool {
        match self {
            IpcError::Frame(FrameError::PayloadTooLarge { .. }) => false,
            IpcError::Frame(_)
            | IpcError::Dispatch(_)
            | IpcError::HandlerPanicked { .. }
            | IpcError::Protocol(_) => true,
            IpcError::Transport(_)
            | IpcError::Accept { .. }
            | IpcError::Activation(_)
            | IpcError::Spawn(_)
            | IpcError::InvalidRequest(_)
            | IpcError::SessionClosed => false,
        }
    }

    /// Returns true when establishment gave up waiting for the daemon.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            IpcError::Accept {
                source: TransportError::AcceptTimeout(_),
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, IpcError>;
