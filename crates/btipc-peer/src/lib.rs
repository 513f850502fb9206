//! The HAL/daemon session layer.
//!
//! The HAL listens, asks for the daemon to be started and accepts two
//! connections from it. Commands travel on the first connection, one round
//! trip at a time. Events arrive on the second and are dispatched from a
//! dedicated thread through an [`EventRegistry`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use btipc_peer::{EventRegistry, NoopActivator, Session, SessionConfig};
//!
//! let registry = Arc::new(EventRegistry::events());
//! let session = Session::connect(SessionConfig::default(), registry, &NoopActivator)?;
//! let status = session.execute(0, 0x01, &[1])?;
//! println!("register module: {status}");
//! # Ok::<(), btipc_peer::IpcError>(())
//! ```

pub mod activation;
pub mod command;
mod connection;
pub mod config;
pub mod daemon;
pub mod error;
pub mod hooks;
pub mod notification;
pub mod registry;
pub mod session;

pub use activation::{CommandActivator, NoopActivator, PeerActivator};
pub use command::{CommandChannel, Reply, ReplyExpectation};
pub use config::{DaemonConfig, FaultCallback, FaultPolicy, SessionConfig, DEFAULT_ACCEPT_TIMEOUT};
pub use daemon::{DaemonEndpoint, Notifier, Response};
pub use error::{DispatchError, IpcError, Result};
pub use hooks::{NoopHooks, ThreadHooks};
pub use notification::{Event, ListenerState};
pub use registry::{
    CommandCallback, CommandRegistry, EventCallback, EventRegistry, HandlerDescriptor,
    PayloadLength, Registry, ServiceTable,
};
pub use session::Session;
