use std::time::Duration;

use crate::address::SocketPath;

/// Errors that can occur in IPC transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to create a socket.
    #[error("failed to create socket: {0}")]
    Socket(std::io::Error),

    /// Failed to bind or listen on the specified address.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: SocketPath,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: SocketPath,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// No connection arrived within the accept deadline.
    #[error("no connection within {0:?}")]
    AcceptTimeout(Duration),

    /// An I/O error occurred on a connected socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: SocketPath,
        len: usize,
        max: usize,
    },

    /// Abstract socket names are only available on Linux and Android.
    #[error("abstract socket addresses are not supported on this platform: {0}")]
    AbstractUnsupported(SocketPath),
}

pub type Result<T> = std::result::Result<T, TransportError>;
