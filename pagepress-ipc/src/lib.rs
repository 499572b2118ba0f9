//! Inter-process communication for pagepress
//!
//! This crate provides the wire protocol and the framed message channel used
//! between the orchestrating side and rendering worker processes.

pub mod channel;
pub mod error;
pub mod protocol;
pub mod transport;

pub use channel::MessageChannel;
pub use error::IpcError;
pub use protocol::{Envelope, Message, PROTOCOL_VERSION};
pub use transport::{stdio, FramedReader, FramedWriter};
