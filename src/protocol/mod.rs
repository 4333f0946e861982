//! Packet protocol: wire header, command tags and codec.
//!
//! This module provides the wire format shared by both endpoints of a tunnel.

mod codec;
mod command;
mod error;
mod header;
mod packet;

pub use codec::{decode, encode, encode_into};
pub use command::Command;
pub use error::{Error, Result};
pub use header::{PacketHeader, Timestamp};
pub use packet::Packet;

/// Magic prefix "CAM" in the top three bytes of the first header word.
pub const MAGIC: u32 = 0x4341_4D00;

/// Mask selecting the magic prefix; the low byte carries the command tag.
pub const MAGIC_MASK: u32 = 0xFFFF_FF00;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 24;

/// Default maximum size of a sysex block (delimiters included).
pub const DEFAULT_MAX_SYSEX: usize = 2048;
