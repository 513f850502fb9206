use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::address::SocketPath;
use crate::error::{Result, TransportError};
use crate::packet::{new_socket, set_cloexec, SeqPacket};

/// Listening Unix-domain sequential-packet socket.
///
/// Abstract addresses need no cleanup. Filesystem addresses create a socket
/// file with restrictive permissions that is removed on drop, unless the path
/// was replaced while the listener was alive.
pub struct SeqPacketListener {
    fd: OwnedFd,
    path: SocketPath,
    created_inode: Option<(u64, u64)>,
}

impl SeqPacketListener {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Listen backlog: the daemon opens exactly two connections.
    pub const DEFAULT_BACKLOG: i32 = 2;

    /// Bind and listen on `path`.
    ///
    /// If a filesystem path already exists and is a socket, it is removed first
    /// (stale socket cleanup).
    pub fn bind(path: &SocketPath) -> Result<Self> {
        Self::bind_with_backlog(path, Self::DEFAULT_BACKLOG)
    }

    /// Bind and listen with an explicit backlog.
    pub fn bind_with_backlog(path: &SocketPath, backlog: i32) -> Result<Self> {
        let (addr, len) = path.to_sockaddr()?;

        if let Some(fs_path) = path.as_path() {
            remove_stale_socket(path, fs_path)?;
        }

        let fd = new_socket().map_err(TransportError::Socket)?;
        let bind_err = |source: io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        // SAFETY: `addr` is a fully initialised sockaddr_un of length `len`.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&addr as *const libc::sockaddr_un).cast::<libc::sockaddr>(),
                len,
            )
        };
        if rc < 0 {
            return Err(bind_err(io::Error::last_os_error()));
        }

        // SAFETY: `fd` is a bound socket owned by this function.
        if unsafe { libc::listen(fd.as_raw_fd(), backlog) } < 0 {
            return Err(bind_err(io::Error::last_os_error()));
        }
        // Readiness comes from poll; accept itself must never block.
        set_nonblocking(fd.as_raw_fd(), true).map_err(bind_err)?;

        let mut created_inode = None;
        if let Some(fs_path) = path.as_path() {
            std::fs::set_permissions(
                fs_path,
                std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE),
            )
            .map_err(bind_err)?;
            let metadata = std::fs::symlink_metadata(fs_path).map_err(bind_err)?;
            created_inode = Some((metadata.dev(), metadata.ino()));
        }

        info!(%path, "listening on seqpacket socket");

        Ok(Self {
            fd,
            path: path.clone(),
            created_inode,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<SeqPacket> {
        self.accept_until(None)
    }

    /// Accept an incoming connection, waiting at most `timeout`.
    ///
    /// Exceeding the deadline yields [`TransportError::AcceptTimeout`]. A
    /// connection that goes away between readiness and accept does not
    /// extend the wait.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<SeqPacket> {
        self.accept_until(Some((Instant::now() + timeout, timeout)))
    }

    fn accept_until(&self, deadline: Option<(Instant, Duration)>) -> Result<SeqPacket> {
        loop {
            let millis = match deadline {
                Some((at, _)) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    remaining.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
                }
                None => -1,
            };
            let mut pfd = libc::pollfd {
                fd: self.fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };

            // SAFETY: `pfd` is a single valid pollfd for the duration of the call.
            let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(TransportError::Accept(err));
            }
            if rc == 0 {
                if let Some((_, timeout)) = deadline {
                    return Err(TransportError::AcceptTimeout(timeout));
                }
                continue;
            }

            match accept_raw(&self.fd) {
                Ok(fd) => {
                    debug!(path = %self.path, "accepted connection");
                    return Ok(SeqPacket::from_owned(fd));
                }
                Err(err) if is_transient_accept_error(&err) => {
                    debug!(path = %self.path, error = %err, "pending connection vanished");
                    continue;
                }
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
    }

    /// The address this socket is bound to.
    pub fn path(&self) -> &SocketPath {
        &self.path
    }
}

impl Drop for SeqPacketListener {
    fn drop(&mut self) {
        let (Some(fs_path), Some((expected_dev, expected_ino))) =
            (self.path.as_path(), self.created_inode)
        else {
            return;
        };

        if let Ok(metadata) = std::fs::symlink_metadata(fs_path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?fs_path, "cleaning up socket file");
                let _ = std::fs::remove_file(fs_path);
            } else {
                debug!(
                    path = ?fs_path,
                    "socket path identity changed; skipping cleanup"
                );
            }
        }
    }
}

impl std::fmt::Debug for SeqPacketListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqPacketListener")
            .field("path", &self.path)
            .finish()
    }
}

fn remove_stale_socket(path: &SocketPath, fs_path: &Path) -> Result<()> {
    if !fs_path.exists() {
        return Ok(());
    }

    let metadata = std::fs::symlink_metadata(fs_path).map_err(|e| TransportError::Bind {
        path: path.clone(),
        source: e,
    })?;
    if !metadata.file_type().is_socket() {
        return Err(TransportError::Bind {
            path: path.clone(),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "existing path is not a unix socket",
            ),
        });
    }

    debug!(path = ?fs_path, "removing stale socket");
    std::fs::remove_file(fs_path).map_err(|e| TransportError::Bind {
        path: path.clone(),
        source: e,
    })
}

fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
    )
}

fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor owned by the caller.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn accept_raw(listener: &OwnedFd) -> io::Result<OwnedFd> {
    // SAFETY: null address pointers are allowed when the peer address is unused.
    let raw = unsafe {
        libc::accept4(
            listener.as_raw_fd(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            libc::SOCK_CLOEXEC,
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: accept4 returned a fresh descriptor that nothing else owns.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    set_cloexec(fd.as_raw_fd())?;
    Ok(fd)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn accept_raw(listener: &OwnedFd) -> io::Result<OwnedFd> {
    // SAFETY: null address pointers are allowed when the peer address is unused.
    let raw = unsafe {
        libc::accept(
            listener.as_raw_fd(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: accept returned a fresh descriptor that nothing else owns.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    set_cloexec(fd.as_raw_fd())?;
    // BSD-derived accept copies O_NONBLOCK from the listener.
    set_nonblocking(fd.as_raw_fd(), false)?;
    Ok(fd)
}
