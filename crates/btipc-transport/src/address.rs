use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, TransportError};

/// Well-known abstract name shared by the HAL library and the daemon.
pub const DEFAULT_ABSTRACT_NAME: &str = "bluez_hal_socket";

/// Address of a local sequential-packet socket.
///
/// Abstract addresses live in the Linux abstract namespace and need no
/// filesystem cleanup. Filesystem addresses create a socket file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SocketPath {
    /// Abstract namespace name, without the leading NUL byte.
    Abstract(Vec<u8>),
    /// Filesystem socket path.
    Filesystem(PathBuf),
}

/// A socket path string that could not be parsed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid socket path {0:?}: expected '@name' or a filesystem path")]
pub struct InvalidSocketPath(pub String);

impl SocketPath {
    /// Abstract namespace address.
    pub fn abstract_name(name: impl AsRef<[u8]>) -> Self {
        Self::Abstract(name.as_ref().to_vec())
    }

    /// Filesystem address.
    pub fn filesystem(path: impl Into<PathBuf>) -> Self {
        Self::Filesystem(path.into())
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self, Self::Abstract(_))
    }

    /// The filesystem path, if this is a filesystem address.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Filesystem(path) => Some(path),
            Self::Abstract(_) => None,
        }
    }

    /// Build the `sockaddr_un` for this address.
    ///
    /// Abstract names use exactly `name.len() + 1` bytes of `sun_path`; they are
    /// not padded with trailing NULs.
    pub(crate) fn to_sockaddr(&self) -> Result<(libc::sockaddr_un, libc::socklen_t)> {
        // SAFETY: sockaddr_un is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

        let (bytes, limit) = match self {
            Self::Abstract(name) => {
                if !cfg!(any(target_os = "linux", target_os = "android")) {
                    return Err(TransportError::AbstractUnsupported(self.clone()));
                }
                let mut bytes = Vec::with_capacity(name.len() + 1);
                bytes.push(0u8);
                bytes.extend_from_slice(name);
                (bytes, addr.sun_path.len())
            }
            // Filesystem paths keep room for the terminating NUL.
            Self::Filesystem(path) => (
                path.as_os_str().as_bytes().to_vec(),
                addr.sun_path.len() - 1,
            ),
        };

        if bytes.len() > limit {
            return Err(TransportError::PathTooLong {
                path: self.clone(),
                len: bytes.len(),
                max: limit,
            });
        }

        for (dst, src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
            *dst = *src as libc::c_char;
        }

        let base = std::mem::offset_of!(libc::sockaddr_un, sun_path);
        let len = match self {
            Self::Abstract(_) => base + bytes.len(),
            Self::Filesystem(_) => base + bytes.len() + 1,
        };

        Ok((addr, len as libc::socklen_t))
    }
}

impl Default for SocketPath {
    fn default() -> Self {
        Self::abstract_name(DEFAULT_ABSTRACT_NAME)
    }
}

impl fmt::Display for SocketPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abstract(name) => write!(f, "@{}", String::from_utf8_lossy(name)),
            Self::Filesystem(path) => write!(f, "{}", path.display()),
        }
    }
}

impl FromStr for SocketPath {
    type Err = InvalidSocketPath;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix('@') {
            if name.is_empty() {
                return Err(InvalidSocketPath(s.to_string()));
            }
            return Ok(Self::abstract_name(name));
        }
        if s.is_empty() {
            return Err(InvalidSocketPath(s.to_string()));
        }
        Ok(Self::filesystem(s))
    }
}
