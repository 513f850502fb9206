use std::time::Duration;

use btipc_transport::{SeqPacket, SeqPacketListener};
use tracing::{debug, info};

use crate::activation::PeerActivator;
use crate::config::SessionConfig;
use crate::error::{IpcError, Result};

/// The two connections of a session, in accept order.
#[derive(Debug)]
pub(crate) struct Channels {
    pub(crate) command: SeqPacket,
    pub(crate) notification: SeqPacket,
}

/// Listen, ask for the daemon to be started and accept its two connections.
///
/// The first accepted connection carries commands, the second carries
/// notifications. On any failure every socket opened so far is closed and
/// no session exists.
pub(crate) fn establish(config: &SessionConfig, activator: &dyn PeerActivator) -> Result<Channels> {
    let listener = SeqPacketListener::bind(&config.socket)?;

    debug!(socket = %config.socket, "requesting daemon start");
    activator.request_start().map_err(IpcError::Activation)?;

    let command = accept(&listener, "command", config.accept_timeout)?;
    let notification = accept(&listener, "notification", config.accept_timeout)?;

    info!(socket = %config.socket, "daemon connected");
    Ok(Channels {
        command,
        notification,
    })
}

fn accept(listener: &SeqPacketListener, channel: &'static str, timeout: Duration) -> Result<SeqPacket> {
    let socket = listener
        .accept_timeout(timeout)
        .map_err(|source| IpcError::Accept { channel, source })?;

    match socket.peer_credentials() {
        Some((uid, gid, pid)) => debug!(channel, pid, uid, gid, "accepted connection"),
        None => debug!(channel, "accepted connection"),
    }
    Ok(socket)
}
