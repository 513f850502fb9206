//! Bluetooth HAL IPC transport.
//!
//! A HAL library and a privileged daemon exchange fixed-header binary frames
//! over two local sequential-packet connections: commands with synchronous
//! replies on one, asynchronous events on the other.
//!
//! # Crate Structure
//!
//! - [`transport`] — Unix-domain seqpacket sockets with descriptor passing
//! - [`frame`] — Header codec, service ids, status codes, frame I/O
//! - [`peer`] — Sessions, dispatch registry and the daemon endpoint (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use btipc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use btipc_frame::*;
}

/// Re-export session types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use btipc_peer::*;
}
