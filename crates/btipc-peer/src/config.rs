use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use btipc_frame::FrameConfig;
use btipc_transport::SocketPath;

use crate::error::IpcError;
use crate::hooks::{NoopHooks, ThreadHooks};

/// How long to wait for each daemon connection.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

/// What happens when the notification listener detects a fatal error.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FaultPolicy {
    /// Tear the session down; later calls fail with `SessionClosed`.
    #[default]
    TearDown,
    /// Log and terminate the process with status 1.
    Exit,
}

/// Notified of faults detected on the listener thread.
pub type FaultCallback = Arc<dyn Fn(&IpcError) + Send + Sync>;

/// Configuration of the HAL side of a session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Listening address. Default: abstract `bluez_hal_socket`.
    pub socket: SocketPath,
    /// Timeout for each of the two accepts. Default: 5 s.
    pub accept_timeout: Duration,
    pub frame: FrameConfig,
    pub fault_policy: FaultPolicy,
    pub thread_hooks: Arc<dyn ThreadHooks>,
    pub on_fault: Option<FaultCallback>,
}

impl SessionConfig {
    pub fn with_socket(mut self, socket: SocketPath) -> Self {
        self.socket = socket;
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    pub fn with_thread_hooks(mut self, hooks: Arc<dyn ThreadHooks>) -> Self {
        self.thread_hooks = hooks;
        self
    }

    pub fn with_fault_callback(mut self, f: impl Fn(&IpcError) + Send + Sync + 'static) -> Self {
        self.on_fault = Some(Arc::new(f));
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            socket: SocketPath::default(),
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            frame: FrameConfig::default(),
            fault_policy: FaultPolicy::default(),
            thread_hooks: Arc::new(NoopHooks),
            on_fault: None,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("socket", &self.socket)
            .field("accept_timeout", &self.accept_timeout)
            .field("frame", &self.frame)
            .field("fault_policy", &self.fault_policy)
            .field("on_fault", &self.on_fault.is_some())
            .finish_non_exhaustive()
    }
}

/// Configuration of the daemon side.
#[derive(Debug, Clone, Default)]
pub struct DaemonConfig {
    /// Address the HAL listens on.
    pub socket: SocketPath,
    pub frame: FrameConfig,
}

impl DaemonConfig {
    pub fn with_socket(mut self, socket: SocketPath) -> Self {
        self.socket = socket;
        self
    }

    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }
}
