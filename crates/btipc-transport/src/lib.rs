//! Unix-domain sequential-packet transport for the Bluetooth HAL IPC.
//!
//! This is the lowest layer of btipc. It provides:
//! - [`SeqPacketListener`]: bind/listen/accept with an optional deadline
//! - [`SeqPacket`]: connected record-oriented sockets with `SCM_RIGHTS`
//!   descriptor passing and half-close
//! - [`SocketPath`]: abstract-namespace or filesystem addresses
//!
//! Everything else builds on the [`SeqPacket`] type provided here.

pub mod address;
pub mod error;
pub mod packet;
pub mod uds;

pub use address::{InvalidSocketPath, SocketPath, DEFAULT_ABSTRACT_NAME};
pub use error::{Result, TransportError};
pub use packet::{Received, SeqPacket};
pub use uds::SeqPacketListener;
