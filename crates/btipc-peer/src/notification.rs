//! Asynchronous event delivery on a dedicated thread.

use std::os::fd::OwnedFd;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use btipc_frame::{FrameError, FrameReader, ReceivedFrame};
use btipc_transport::SeqPacket;
use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::command::CommandChannel;
use crate::config::{FaultCallback, FaultPolicy, SessionConfig};
use crate::error::{IpcError, Result};
use crate::hooks::HookGuard;
use crate::registry::EventRegistry;

/// An event pushed by the daemon.
#[derive(Debug)]
pub struct Event {
    pub service_id: u8,
    pub opcode: u8,
    pub payload: Bytes,
    /// Descriptor passed with the event, owned by the handler.
    pub fd: Option<OwnedFd>,
}

/// Lifecycle of the notification listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Running,
    /// Orderly shutdown after the command channel was closed.
    Stopped,
    /// The listener hit a fault and tore the session down.
    Aborted,
}

impl ListenerState {
    fn to_u8(self) -> u8 {
        match self {
            ListenerState::Running => 0,
            ListenerState::Stopped => 1,
            ListenerState::Aborted => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ListenerState::Running,
            1 => ListenerState::Stopped,
            _ => ListenerState::Aborted,
        }
    }
}

pub(crate) struct NotificationListener {
    handle: Mutex<Option<JoinHandle<()>>>,
    state: Arc<AtomicU8>,
}

struct Worker {
    reader: FrameReader,
    registry: Arc<EventRegistry>,
    commands: Arc<CommandChannel>,
    policy: FaultPolicy,
    on_fault: Option<FaultCallback>,
}

impl NotificationListener {
    pub(crate) fn spawn(
        notification: SeqPacket,
        registry: Arc<EventRegistry>,
        commands: Arc<CommandChannel>,
        config: &SessionConfig,
    ) -> Result<Self> {
        let state = Arc::new(AtomicU8::new(ListenerState::Running.to_u8()));
        let worker = Worker {
            reader: FrameReader::with_config(notification, config.frame.clone()),
            registry,
            commands,
            policy: config.fault_policy,
            on_fault: config.on_fault.clone(),
        };
        let hooks = Arc::clone(&config.thread_hooks);
        let thread_state = Arc::clone(&state);

        let handle = thread::Builder::new()
            .name("btipc-notify".into())
            .spawn(move || {
                let _hooks = HookGuard::new(hooks);
                let outcome = worker.run();
                thread_state.store(outcome.to_u8(), Ordering::Release);
            })
            .map_err(IpcError::Spawn)?;

        Ok(Self {
            handle: Mutex::new(Some(handle)),
            state,
        })
    }

    pub(crate) fn state(&self) -> ListenerState {
        ListenerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Wait for the thread to finish. A call from the listener thread itself
    /// only detaches it, and only the first caller waits.
    ///
    /// The handle lock is released before joining, so handlers may inspect
    /// the session while its owner is waiting here.
    pub(crate) fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            debug!("teardown on notification thread; not joining");
            return;
        }
        if handle.join().is_err() {
            warn!("notification listener panicked");
        }
    }
}

impl Worker {
    fn run(mut self) -> ListenerState {
        info!("notification listener started");
        loop {
            let frame = match self.reader.read_frame() {
                Ok(frame) => frame,
                Err(FrameError::ConnectionClosed) if !self.commands.is_open() => {
                    info!("notification listener stopped");
                    return ListenerState::Stopped;
                }
                Err(err) => return self.fault(err.into()),
            };

            if let Err(err) = self.dispatch(frame) {
                return self.fault(err);
            }
        }
    }

    fn dispatch(&self, frame: ReceivedFrame) -> Result<()> {
        let ReceivedFrame {
            header,
            payload,
            fd,
        } = frame;
        header.ensure_event()?;

        let handler = self
            .registry
            .resolve(header.service_id, header.opcode, payload.len())?;

        debug!(
            service_id = header.service_id,
            opcode = header.opcode,
            len = payload.len(),
            "dispatching event"
        );
        let event = Event {
            service_id: header.service_id,
            opcode: header.opcode,
            payload,
            fd,
        };
        panic::catch_unwind(AssertUnwindSafe(|| (handler.callback)(event))).map_err(|_| {
            IpcError::HandlerPanicked {
                service_id: header.service_id,
                opcode: header.opcode,
            }
        })
    }

    fn fault(&self, err: IpcError) -> ListenerState {
        error!(error = %err, "notification channel fault");
        self.commands.sever();
        if let Some(on_fault) = &self.on_fault {
            on_fault(&err);
        }
        if self.policy == FaultPolicy::Exit {
            error!("terminating after notification channel fault");
            std::process::exit(1);
        }
        ListenerState::Aborted
    }
}
