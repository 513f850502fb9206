use std::fmt;

use btipc_frame::FrameError;
use btipc_peer::IpcError;
use btipc_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PROTOCOL_VIOLATION: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

fn transport_code(err: &TransportError) -> i32 {
    match err {
        TransportError::AcceptTimeout(_) => TIMEOUT,
        TransportError::PathTooLong { .. } | TransportError::AbstractUnsupported(_) => USAGE,
        _ => TRANSPORT_ERROR,
    }
}

fn frame_code(err: &FrameError) -> i32 {
    match err {
        FrameError::Transport(err) => transport_code(err),
        FrameError::PayloadTooLarge { .. } => USAGE,
        FrameError::ConnectionClosed => FAILURE,
        _ => PROTOCOL_VIOLATION,
    }
}

fn ipc_code(err: &IpcError) -> i32 {
    match err {
        IpcError::Transport(err) | IpcError::Accept { source: err, .. } => transport_code(err),
        IpcError::Activation(_) => TRANSPORT_ERROR,
        IpcError::Spawn(_) | IpcError::HandlerPanicked { .. } => INTERNAL,
        IpcError::Frame(err) => frame_code(err),
        IpcError::Dispatch(_) | IpcError::Protocol(_) => PROTOCOL_VIOLATION,
        IpcError::InvalidRequest(_) => USAGE,
        IpcError::SessionClosed => FAILURE,
    }
}

pub fn ipc_error(context: &str, err: IpcError) -> CliError {
    CliError::new(ipc_code(&err), format!("{context}: {err}"))
}
