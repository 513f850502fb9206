//! The daemon end of the transport.
//!
//! The daemon connects twice to the HAL's listening address: first the
//! command channel, then the notification channel. Commands are answered
//! one at a time from a [`CommandRegistry`]; events are pushed through a
//! [`Notifier`] from any thread.

use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;

use btipc_frame::service::{is_event, OP_STATUS};
use btipc_frame::{Frame, FrameError, FrameReader, FrameWriter, ReceivedFrame, Status};
use btipc_transport::SeqPacket;
use bytes::Bytes;
use tracing::{debug, info};

use crate::config::DaemonConfig;
use crate::error::{IpcError, Result};
use crate::registry::CommandRegistry;

/// A command handler's answer.
#[derive(Debug)]
pub enum Response {
    /// Success is sent as an empty reply with the request's opcode; any
    /// other code goes out on the status opcode.
    Status(Status),
    /// A reply with the request's opcode and an optional descriptor.
    Full {
        payload: Bytes,
        fd: Option<OwnedFd>,
    },
}

impl Response {
    pub fn success() -> Self {
        Response::Status(Status::Success)
    }

    pub fn payload(payload: impl Into<Bytes>) -> Self {
        Response::Full {
            payload: payload.into(),
            fd: None,
        }
    }

    pub fn with_fd(payload: impl Into<Bytes>, fd: OwnedFd) -> Self {
        Response::Full {
            payload: payload.into(),
            fd: Some(fd),
        }
    }
}

impl From<Status> for Response {
    fn from(status: Status) -> Self {
        Response::Status(status)
    }
}

/// Connected daemon endpoint.
pub struct DaemonEndpoint {
    reader: FrameReader,
    writer: FrameWriter,
    notifier: Notifier,
}

impl DaemonEndpoint {
    /// Connect the command channel, then the notification channel.
    pub fn connect(config: &DaemonConfig) -> Result<Self> {
        let command = SeqPacket::connect(&config.socket)?;
        let notification = SeqPacket::connect(&config.socket)?;
        info!(socket = %config.socket, "connected to HAL");

        Ok(Self {
            reader: FrameReader::with_config(command.try_clone()?, config.frame.clone()),
            writer: FrameWriter::with_config(command, config.frame.clone()),
            notifier: Notifier {
                writer: Arc::new(FrameWriter::with_config(notification, config.frame.clone())),
            },
        })
    }

    /// Handle for pushing events.
    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Answer commands until the HAL closes the command channel.
    ///
    /// Malformed or unroutable commands are fatal and end the loop with an
    /// error.
    pub fn serve(&mut self, registry: &CommandRegistry) -> Result<()> {
        loop {
            let frame = match self.reader.read_frame() {
                Ok(frame) => frame,
                Err(FrameError::ConnectionClosed) => {
                    info!("command channel closed by HAL");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            self.handle(registry, frame)?;
        }
    }

    fn handle(&self, registry: &CommandRegistry, frame: ReceivedFrame) -> Result<()> {
        let ReceivedFrame {
            header, payload, ..
        } = frame;

        let handler = registry.resolve(header.service_id, header.opcode, payload.len())?;
        debug!(
            service_id = header.service_id,
            opcode = header.opcode,
            len = payload.len(),
            "handling command"
        );
        let response = (handler.callback)(&payload[..]);
        self.respond(header.service_id, header.opcode, response)
    }

    fn respond(&self, service_id: u8, opcode: u8, response: Response) -> Result<()> {
        let (reply, fd) = match response {
            Response::Status(status) if status.is_success() => {
                (Frame::new(service_id, opcode, Bytes::new()), None)
            }
            Response::Status(status) => (
                Frame::new(
                    service_id,
                    OP_STATUS,
                    Bytes::copy_from_slice(&status.to_payload()),
                ),
                None,
            ),
            Response::Full { payload, fd } => (Frame::new(service_id, opcode, payload), fd),
        };
        self.writer.send_with_fd(
            reply.service_id,
            reply.opcode,
            &reply.payload,
            fd.as_ref().map(|fd| fd.as_fd()),
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for DaemonEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonEndpoint").finish_non_exhaustive()
    }
}

/// Sends events on the notification channel. Cheap to clone.
#[derive(Clone)]
pub struct Notifier {
    writer: Arc<FrameWriter>,
}

impl Notifier {
    pub fn send(&self, service_id: u8, opcode: u8, payload: &[u8]) -> Result<()> {
        self.send_with_fd(service_id, opcode, payload, None)
    }

    /// Send an event with a descriptor; the descriptor stays owned by the
    /// caller.
    pub fn send_with_fd(
        &self,
        service_id: u8,
        opcode: u8,
        payload: &[u8],
        fd: Option<std::os::fd::BorrowedFd<'_>>,
    ) -> Result<()> {
        if !is_event(opcode) {
            return Err(IpcError::InvalidRequest(format!(
                "opcode 0x{opcode:02x} is not an event"
            )));
        }
        self.writer.send_with_fd(service_id, opcode, payload, fd)?;
        Ok(())
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}
