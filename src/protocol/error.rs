//! Packet protocol error types

use thiserror::Error;

/// Errors raised while encoding or validating packets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Datagram shorter than the fixed header
    #[error("packet too short: need {needed} bytes, got {got}")]
    PacketTooShort {
        /// Minimum size
        needed: usize,
        /// Received size
        got: usize,
    },

    /// Magic prefix missing
    #[error("no magic: expected 0x43414Dxx, got {found:#010x}")]
    NoMagic {
        /// First header word as received
        found: u32,
    },

    /// Unknown command tag
    #[error("unknown command tag: {tag:#04x}")]
    WrongCommand {
        /// Low byte of the first header word
        tag: u8,
    },

    /// Declared payload size disagrees with the datagram size
    #[error("wrong payload size: header says {declared} bytes, datagram carries {actual}")]
    WrongSize {
        /// Size stored in the header
        declared: u32,
        /// Bytes following the header
        actual: usize,
    },

    /// Payload cannot be represented in the header or exceeds a limit
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Output buffer too small for the encoded packet
    #[error("buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall {
        /// Needed size
        needed: usize,
        /// Actual size
        got: usize,
    },

    /// `MIDI_MSG` payload that is not a well-formed message
    #[error("invalid MIDI message payload: {payload:02x?}")]
    InvalidMidiMessage {
        /// Offending payload
        payload: Vec<u8>,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
