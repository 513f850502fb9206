//! Wire format of the Bluetooth HAL IPC.
//!
//! Every message on both the command and the notification channel is one
//! sequential-packet record made of:
//! - a 1-byte service id
//! - a 1-byte opcode (commands below `0x81`, events from `0x81`)
//! - a 2-byte little-endian payload length
//! - the payload
//!
//! A record either validates completely or the channel is broken.

pub mod codec;
pub mod error;
pub mod reader;
pub mod service;
pub mod status;
pub mod writer;

pub use codec::{
    encode_frame, parse_header, Frame, FrameConfig, Header, DEFAULT_MTU, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::{FrameReader, ReceivedFrame};
pub use service::{MINIMUM_EVENT, OP_STATUS, SERVICE_COUNT, SERVICE_ID_MAX};
pub use status::{Status, STATUS_SIZE};
pub use writer::FrameWriter;
