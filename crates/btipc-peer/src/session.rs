use std::sync::Arc;

use btipc_frame::Status;
use btipc_transport::SocketPath;
use tracing::info;

use crate::activation::PeerActivator;
use crate::command::{CommandChannel, Reply, ReplyExpectation};
use crate::config::SessionConfig;
use crate::connection;
use crate::error::Result;
use crate::notification::{ListenerState, NotificationListener};
use crate::registry::EventRegistry;

/// The HAL side of a live connection to the daemon.
///
/// Dropping the session tears it down: the command channel is closed, the
/// notification channel is half-closed for reading and the listener thread
/// is joined.
pub struct Session {
    commands: Arc<CommandChannel>,
    listener: NotificationListener,
    socket: SocketPath,
}

impl Session {
    /// Listen on `config.socket`, trigger `activator` and accept the daemon.
    ///
    /// Events are routed through `registry`; handlers may be registered or
    /// replaced while the session is live.
    pub fn connect(
        config: SessionConfig,
        registry: Arc<EventRegistry>,
        activator: &dyn PeerActivator,
    ) -> Result<Self> {
        let channels = connection::establish(&config, activator)?;

        let notification_control = channels.notification.try_clone()?;
        let commands = Arc::new(CommandChannel::new(
            channels.command,
            notification_control,
            &config.frame,
        )?);

        let listener = NotificationListener::spawn(
            channels.notification,
            registry,
            Arc::clone(&commands),
            &config,
        )?;

        info!(socket = %config.socket, "session established");
        Ok(Self {
            commands,
            listener,
            socket: config.socket,
        })
    }

    /// Execute a command that expects a status-only reply.
    pub fn execute(&self, service_id: u8, opcode: u8, payload: &[u8]) -> Result<Status> {
        let result = self.commands.execute(service_id, opcode, payload);
        self.teardown_on_fault(result)
    }

    /// Execute a command whose reply may carry a payload or a descriptor.
    pub fn execute_with_reply(
        &self,
        service_id: u8,
        opcode: u8,
        payload: &[u8],
        expect: ReplyExpectation,
    ) -> Result<Reply> {
        let result = self
            .commands
            .execute_with_reply(service_id, opcode, payload, expect);
        self.teardown_on_fault(result)
    }

    /// Shared handle to the command channel, for use from event handlers.
    ///
    /// A fault seen through this handle severs the session but leaves
    /// joining the listener to the session owner.
    pub fn commands(&self) -> Arc<CommandChannel> {
        Arc::clone(&self.commands)
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }

    pub fn is_open(&self) -> bool {
        self.commands.is_open()
    }

    pub fn socket(&self) -> &SocketPath {
        &self.socket
    }

    /// Tear the session down and wait for the listener to stop.
    pub fn close(self) -> ListenerState {
        self.teardown();
        self.listener_state()
    }

    fn teardown_on_fault<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                self.teardown();
            }
        }
        result
    }

    fn teardown(&self) {
        self.commands.close();
        self.listener.join();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("socket", &self.socket)
            .field("open", &self.is_open())
            .field("listener", &self.listener_state())
            .finish()
    }
}
