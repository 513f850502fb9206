use std::fmt;

/// Size of the status reply payload.
pub const STATUS_SIZE: usize = 1;

/// Result code of a command.
///
/// `Success` is only ever conveyed by a reply carrying the request's own
/// opcode; a status-opcode reply always holds a failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Failed,
    NotReady,
    NoMem,
    Busy,
    Done,
    Unsupported,
    Invalid,
    Unhandled,
    AuthFailure,
    RemoteDeviceDown,
    /// A code this library does not know; preserved verbatim.
    Unknown(u8),
}

impl Status {
    /// Wire value of this status.
    pub fn code(self) -> u8 {
        match self {
            Status::Success => 0x00,
            Status::Failed => 0x01,
            Status::NotReady => 0x02,
            Status::NoMem => 0x03,
            Status::Busy => 0x04,
            Status::Done => 0x05,
            Status::Unsupported => 0x06,
            Status::Invalid => 0x07,
            Status::Unhandled => 0x08,
            Status::AuthFailure => 0x09,
            Status::RemoteDeviceDown => 0x0a,
            Status::Unknown(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// Decode a status reply payload.
    ///
    /// Returns `None` unless the payload is exactly [`STATUS_SIZE`] bytes.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload {
            [code] => Some(Self::from(*code)),
            _ => None,
        }
    }

    /// Encode as a status reply payload.
    pub fn to_payload(self) -> [u8; STATUS_SIZE] {
        [self.code()]
    }
}

impl From<u8> for Status {
    fn from(code: u8) -> Self {
        match code {
            0x00 => Status::Success,
            0x01 => Status::Failed,
            0x02 => Status::NotReady,
            0x03 => Status::NoMem,
            0x04 => Status::Busy,
            0x05 => Status::Done,
            0x06 => Status::Unsupported,
            0x07 => Status::Invalid,
            0x08 => Status::Unhandled,
            0x09 => Status::AuthFailure,
            0x0a => Status::RemoteDeviceDown,
            other => Status::Unknown(other),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Success => "success",
            Status::Failed => "failed",
            Status::NotReady => "not_ready",
            Status::NoMem => "nomem",
            Status::Busy => "busy",
            Status::Done => "done",
            Status::Unsupported => "unsupported",
            Status::Invalid => "invalid",
            Status::Unhandled => "unhandled",
            Status::AuthFailure => "auth_failure",
            Status::RemoteDeviceDown => "remote_device_down",
            Status::Unknown(code) => return write!(f, "unknown(0x{code:02x})"),
        };
        f.write_str(name)
    }
}
