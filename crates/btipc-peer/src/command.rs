//! Synchronous command/response channel.

use std::net::Shutdown;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use btipc_frame::service::{is_event, is_valid_service, OP_STATUS};
use btipc_frame::{FrameConfig, FrameReader, FrameWriter, ReceivedFrame, Status};
use btipc_transport::SeqPacket;
use bytes::Bytes;
use tracing::{debug, error};

use crate::error::{IpcError, Result};

/// What the caller is prepared to accept in a successful reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyExpectation {
    /// Longest acceptable reply payload.
    pub max_len: usize,
    /// Keep a descriptor passed with the reply.
    pub want_fd: bool,
}

impl ReplyExpectation {
    /// A success reply with an empty payload and no descriptor.
    pub const STATUS_ONLY: Self = Self {
        max_len: 0,
        want_fd: false,
    };

    pub fn payload(max_len: usize) -> Self {
        Self {
            max_len,
            want_fd: false,
        }
    }

    pub fn with_fd(mut self) -> Self {
        self.want_fd = true;
        self
    }
}

/// A validated reply.
///
/// For a failure status the payload is empty and no descriptor is kept.
#[derive(Debug)]
pub struct Reply {
    pub status: Status,
    pub payload: Bytes,
    pub fd: Option<OwnedFd>,
}

struct Link {
    reader: FrameReader,
    writer: FrameWriter,
}

/// The command half of a session.
///
/// One lock is held for the whole round trip, so at most one command is in
/// flight and every reply is matched to the request that caused it.
pub struct CommandChannel {
    link: Mutex<Option<Link>>,
    command_control: SeqPacket,
    notification_control: SeqPacket,
    open: AtomicBool,
}

impl CommandChannel {
    pub(crate) fn new(
        command: SeqPacket,
        notification_control: SeqPacket,
        frame: &FrameConfig,
    ) -> Result<Self> {
        let command_control = command.try_clone()?;
        let reader = FrameReader::with_config(command.try_clone()?, frame.clone());
        let writer = FrameWriter::with_config(command, frame.clone());
        Ok(Self {
            link: Mutex::new(Some(Link { reader, writer })),
            command_control,
            notification_control,
            open: AtomicBool::new(true),
        })
    }

    /// Returns false once the session has been torn down or has faulted.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Send a command and wait for a status-only reply.
    ///
    /// A failure status is an ordinary `Ok`; only transport or protocol
    /// problems are errors.
    pub fn execute(&self, service_id: u8, opcode: u8, payload: &[u8]) -> Result<Status> {
        self.execute_with_reply(service_id, opcode, payload, ReplyExpectation::STATUS_ONLY)
            .map(|reply| reply.status)
    }

    /// Send a command and wait for its reply.
    pub fn execute_with_reply(
        &self,
        service_id: u8,
        opcode: u8,
        payload: &[u8],
        expect: ReplyExpectation,
    ) -> Result<Reply> {
        if !is_valid_service(service_id) {
            return Err(IpcError::InvalidRequest(format!(
                "service {service_id} is out of range"
            )));
        }
        if opcode == OP_STATUS || is_event(opcode) {
            return Err(IpcError::InvalidRequest(format!(
                "opcode 0x{opcode:02x} is not a command"
            )));
        }

        let mut guard = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        let link = match guard.as_mut() {
            Some(link) if self.is_open() => link,
            _ => return Err(IpcError::SessionClosed),
        };

        debug!(service_id, opcode, len = payload.len(), "executing command");
        let result = round_trip(link, service_id, opcode, payload, expect);

        if let Err(err) = &result {
            if err.is_fatal() {
                error!(service_id, opcode, error = %err, "command channel fault");
                self.sever();
            }
        }
        result
    }

    /// Mark the channel closed and shut both sockets down without taking the
    /// lock, waking any caller blocked in a round trip and the listener.
    pub(crate) fn sever(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!("severing command channel");
        }
        let _ = self.command_control.shutdown(Shutdown::Both);
        let _ = self.notification_control.shutdown(Shutdown::Read);
    }

    /// Sever and release the command socket once no caller holds it.
    pub(crate) fn close(&self) {
        self.sever();
        let link = self
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(link);
    }
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("open", &self.is_open())
            .finish()
    }
}

fn round_trip(
    link: &mut Link,
    service_id: u8,
    opcode: u8,
    payload: &[u8],
    expect: ReplyExpectation,
) -> Result<Reply> {
    link.writer.send(service_id, opcode, payload)?;

    let ReceivedFrame {
        header,
        payload: reply,
        fd,
    } = link.reader.read_frame()?;

    if header.service_id != service_id {
        return Err(IpcError::Protocol(format!(
            "reply on service {} to a command on service {service_id}",
            header.service_id
        )));
    }

    if header.opcode == OP_STATUS {
        let status = Status::from_payload(&reply).ok_or_else(|| {
            IpcError::Protocol(format!(
                "status reply carries {} bytes",
                reply.len()
            ))
        })?;
        if status.is_success() {
            return Err(IpcError::Protocol(
                "status reply carries success".to_string(),
            ));
        }
        debug!(service_id, opcode, %status, "command failed");
        return Ok(Reply {
            status,
            payload: Bytes::new(),
            fd: None,
        });
    }

    if header.opcode != opcode {
        return Err(IpcError::Protocol(format!(
            "reply opcode 0x{:02x} to command 0x{opcode:02x}",
            header.opcode
        )));
    }

    if reply.len() > expect.max_len {
        return Err(IpcError::Protocol(format!(
            "reply of {} bytes exceeds expected {}",
            reply.len(),
            expect.max_len
        )));
    }

    Ok(Reply {
        status: Status::Success,
        payload: reply,
        fd: if expect.want_fd { fd } else { None },
    })
}
