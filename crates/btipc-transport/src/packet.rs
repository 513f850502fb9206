use std::io;
use std::net::Shutdown;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use tracing::{debug, warn};

use crate::address::SocketPath;
use crate::error::{Result, TransportError};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = 0;

/// A connected Unix-domain `SOCK_SEQPACKET` socket.
///
/// Every `send` is delivered as exactly one record and every `recv` returns at
/// most one record, so message boundaries are preserved by the kernel. One
/// file descriptor may travel alongside a record as `SCM_RIGHTS` ancillary
/// data.
pub struct SeqPacket {
    fd: OwnedFd,
}

/// Outcome of a single [`SeqPacket::recv`] call.
#[derive(Debug)]
pub struct Received {
    /// Number of bytes placed in the caller's buffer. Zero means the peer
    /// closed its end (or the read side was shut down).
    pub len: usize,
    /// Descriptor passed alongside the record, owned by the receiver.
    pub fd: Option<OwnedFd>,
    /// The record was larger than the buffer and the kernel discarded the
    /// excess bytes.
    pub truncated: bool,
}

impl SeqPacket {
    pub(crate) fn from_owned(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Connect to a listening sequential-packet socket (blocking).
    pub fn connect(path: &SocketPath) -> Result<Self> {
        let (addr, len) = path.to_sockaddr()?;
        let fd = new_socket().map_err(TransportError::Socket)?;

        loop {
            // SAFETY: `addr` is a fully initialised sockaddr_un and `len` does not
            // exceed its size; `fd` is an open socket owned by this function.
            let rc = unsafe {
                libc::connect(
                    fd.as_raw_fd(),
                    (&addr as *const libc::sockaddr_un).cast::<libc::sockaddr>(),
                    len,
                )
            };
            if rc == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(TransportError::Connect {
                path: path.clone(),
                source: err,
            });
        }

        debug!(%path, "connected seqpacket socket");
        Ok(Self::from_owned(fd))
    }

    /// Create a connected pair of sockets.
    pub fn pair() -> Result<(Self, Self)> {
        let mut fds: [libc::c_int; 2] = [-1; 2];
        // SAFETY: `fds` is a valid two-element array for socketpair to fill.
        let rc = unsafe {
            libc::socketpair(libc::AF_UNIX, socket_type(), 0, fds.as_mut_ptr())
        };
        if rc < 0 {
            return Err(TransportError::Socket(io::Error::last_os_error()));
        }
        // SAFETY: socketpair succeeded, so both descriptors are open and unowned.
        let (left, right) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        set_cloexec(left.as_raw_fd())?;
        set_cloexec(right.as_raw_fd())?;
        Ok((Self::from_owned(left), Self::from_owned(right)))
    }

    /// Send one record assembled from `parts`, optionally passing `fd`.
    ///
    /// Returns the number of bytes the kernel accepted.
    pub fn send(&self, parts: &[&[u8]], fd: Option<BorrowedFd<'_>>) -> Result<usize> {
        let mut iov: Vec<libc::iovec> = parts
            .iter()
            .map(|part| libc::iovec {
                iov_base: part.as_ptr() as *mut libc::c_void,
                iov_len: part.len(),
            })
            .collect();

        let mut control = ControlBuffer::for_one_fd();

        // SAFETY: msghdr is plain old data; all-zero is a valid starting value.
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = iov.as_mut_ptr();
        msg.msg_iovlen = iov.len() as _;

        if let Some(fd) = fd {
            msg.msg_control = control.as_mut_ptr();
            msg.msg_controllen = control.space as _;

            // SAFETY: the control buffer is aligned and at least CMSG_SPACE(int)
            // bytes long, so CMSG_FIRSTHDR is non-null and its data area holds
            // one c_int.
            unsafe {
                let cmsg = libc::CMSG_FIRSTHDR(&msg);
                (*cmsg).cmsg_level = libc::SOL_SOCKET;
                (*cmsg).cmsg_type = libc::SCM_RIGHTS;
                (*cmsg).cmsg_len = libc::CMSG_LEN(FD_SIZE) as _;
                let data = libc::CMSG_DATA(cmsg).cast::<libc::c_int>();
                std::ptr::write_unaligned(data, fd.as_raw_fd());
            }
        }

        loop {
            // SAFETY: `msg` points at live iovecs and control data for the
            // duration of the call.
            let n = unsafe { libc::sendmsg(self.fd.as_raw_fd(), &msg, SEND_FLAGS) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(TransportError::Io(err));
        }
    }

    /// Receive one record into `buf` (blocking).
    ///
    /// Space for one ancillary descriptor is always reserved; a descriptor the
    /// caller does not want is closed when the returned value is dropped.
    pub fn recv(&self, buf: &mut [u8]) -> Result<Received> {
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast::<libc::c_void>(),
            iov_len: buf.len(),
        };
        let mut control = ControlBuffer::for_one_fd();

        // SAFETY: msghdr is plain old data; all-zero is a valid starting value.
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr();
        msg.msg_controllen = control.space as _;

        let len = loop {
            // SAFETY: `msg` points at `buf` and the control buffer, both live
            // and writable for the sizes recorded in the header.
            let n = unsafe { libc::recvmsg(self.fd.as_raw_fd(), &mut msg, RECV_FLAGS) };
            if n >= 0 {
                break n as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(TransportError::Io(err));
        };

        let mut fd = None;
        // SAFETY: the kernel filled `msg` and the control buffer; the CMSG_*
        // macros only walk headers within msg_controllen.
        unsafe {
            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                    let count = ((*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize)
                        / FD_SIZE as usize;
                    let data = libc::CMSG_DATA(cmsg).cast::<libc::c_int>();
                    for i in 0..count {
                        let raw = std::ptr::read_unaligned(data.add(i));
                        let owned = OwnedFd::from_raw_fd(raw);
                        set_cloexec(owned.as_raw_fd())?;
                        // Only the first descriptor is kept; extras close on drop.
                        if fd.is_none() {
                            fd = Some(owned);
                        }
                    }
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
        }

        if msg.msg_flags & libc::MSG_CTRUNC != 0 {
            warn!("ancillary data truncated on receive");
        }

        Ok(Received {
            len,
            fd,
            truncated: msg.msg_flags & libc::MSG_TRUNC != 0,
        })
    }

    /// Shut down one or both halves of the connection.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        let how = match how {
            Shutdown::Read => libc::SHUT_RD,
            Shutdown::Write => libc::SHUT_WR,
            Shutdown::Both => libc::SHUT_RDWR,
        };
        // SAFETY: `fd` is an open socket owned by self.
        let rc = unsafe { libc::shutdown(self.fd.as_raw_fd(), how) };
        if rc < 0 {
            return Err(TransportError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Duplicate the socket handle (creates a new file descriptor).
    ///
    /// Shutting down either handle affects the shared connection.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self::from_owned(self.fd.try_clone()?))
    }

    /// Get the credentials of the connected peer (Linux only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable.
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and `fd` is an open Unix socket descriptor owned by this process.
        let rc = unsafe {
            libc::getsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

impl AsFd for SeqPacket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for SeqPacket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl std::fmt::Debug for SeqPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqPacket")
            .field("fd", &self.fd.as_raw_fd())
            .finish()
    }
}

const FD_SIZE: u32 = std::mem::size_of::<libc::c_int>() as u32;

/// Control-message buffer aligned for `cmsghdr`.
struct ControlBuffer {
    words: Vec<u64>,
    space: usize,
}

impl ControlBuffer {
    fn for_one_fd() -> Self {
        // SAFETY: CMSG_SPACE is a pure size computation.
        let space = unsafe { libc::CMSG_SPACE(FD_SIZE) } as usize;
        Self {
            words: vec![0u64; space.div_ceil(8)],
            space,
        }
    }

    fn as_mut_ptr(&mut self) -> *mut libc::c_void {
        self.words.as_mut_ptr().cast::<libc::c_void>()
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn socket_type() -> libc::c_int {
    libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn socket_type() -> libc::c_int {
    libc::SOCK_SEQPACKET
}

/// Create an unconnected `AF_UNIX`/`SOCK_SEQPACKET` socket.
pub(crate) fn new_socket() -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2) call; the result is checked before use.
    let raw = unsafe { libc::socket(libc::AF_UNIX, socket_type(), 0) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: socket(2) returned a fresh descriptor that nothing else owns.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    set_cloexec(fd.as_raw_fd())?;
    Ok(fd)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn set_cloexec(_fd: RawFd) -> io::Result<()> {
    // SOCK_CLOEXEC / MSG_CMSG_CLOEXEC / accept4 already applied it.
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor owned by the caller.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
