//! MIDI message model and the running-status byte-stream parser.

mod parser;

use std::fmt;

pub use parser::{MidiParser, Parsed};

/// Start of a system-exclusive block.
pub const SYSEX_BEGIN: u8 = 0xF0;
/// End of a system-exclusive block (EOX).
pub const SYSEX_END: u8 = 0xF7;

/// Size of an encoded [`MidiMessage`] inside a `MIDI_MSG` packet.
pub const WIRE_SIZE: usize = 4;

/// Message length per status high nibble for channel messages (0 = not a channel status).
const CHANNEL_LEN: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 3, 3, 3, 3, 2, 2, 3, 0];

/// Message length per low nibble for system statuses 0xF0..=0xFF (0 = undefined or sysex).
const SYSTEM_LEN: [u8; 16] = [0, 2, 3, 2, 0, 0, 1, 0, 1, 0, 1, 1, 1, 0, 1, 1];

/// Total length in bytes of the message started by `status`, including the status byte.
///
/// Returns `None` for data bytes, the sysex delimiters and the undefined statuses
/// 0xF4, 0xF5, 0xF9 and 0xFD.
#[must_use]
pub const fn message_len(status: u8) -> Option<u8> {
    if status & 0x80 == 0 {
        return None;
    }
    let len = if status >= 0xF0 {
        SYSTEM_LEN[(status & 0x0F) as usize]
    } else {
        CHANNEL_LEN[(status >> 4) as usize]
    };
    if len == 0 { None } else { Some(len) }
}

/// Check whether `byte` is a status byte (top bit set).
#[inline]
#[must_use]
pub const fn is_status(byte: u8) -> bool {
    byte & 0x80 != 0
}

/// Check whether `byte` lies in the system real-time range (0xF8..=0xFF).
#[inline]
#[must_use]
pub const fn is_realtime(byte: u8) -> bool {
    byte >= 0xF8
}

/// Check whether `status` is a channel voice/mode status (0x80..=0xEF).
#[inline]
#[must_use]
pub const fn is_channel(status: u8) -> bool {
    status >= 0x80 && status < 0xF0
}

/// A complete non-sysex MIDI message of one to three bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MidiMessage {
    bytes: [u8; 3],
    len: u8,
}

impl MidiMessage {
    /// Build a message from its status byte and data bytes.
    ///
    /// The length comes from the status table; unused data bytes are ignored and
    /// data bytes with the top bit set are rejected.
    #[must_use]
    pub fn new(status: u8, data1: u8, data2: u8) -> Option<Self> {
        let len = message_len(status)?;
        let msg = Self {
            bytes: [status, data1, data2],
            len,
        }
        .trimmed();
        if msg.data().iter().any(|&b| is_status(b)) {
            return None;
        }
        Some(msg)
    }

    /// Build a message from raw bytes; the slice length must match the status table.
    #[must_use]
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        let (&status, data) = raw.split_first()?;
        let len = message_len(status)?;
        if usize::from(len) != raw.len() {
            return None;
        }
        Self::new(
            status,
            data.first().copied().unwrap_or(0),
            data.get(1).copied().unwrap_or(0),
        )
    }

    pub(crate) const fn from_parts(bytes: [u8; 3], len: u8) -> Self {
        Self { bytes, len }
    }

    fn trimmed(mut self) -> Self {
        for byte in &mut self.bytes[usize::from(self.len)..] {
            *byte = 0;
        }
        self
    }

    /// Status byte.
    #[must_use]
    pub const fn status(&self) -> u8 {
        self.bytes[0]
    }

    /// First data byte (0 when absent).
    #[must_use]
    pub const fn data1(&self) -> u8 {
        self.bytes[1]
    }

    /// Second data byte (0 when absent).
    #[must_use]
    pub const fn data2(&self) -> u8 {
        self.bytes[2]
    }

    /// Number of meaningful bytes (1..=3).
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Messages always carry at least their status byte.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// The meaningful bytes of the message.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    fn data(&self) -> &[u8] {
        &self.bytes[1..self.len()]
    }

    /// MIDI channel (0..=15) for channel messages.
    #[must_use]
    pub const fn channel(&self) -> Option<u8> {
        if is_channel(self.status()) {
            Some(self.status() & 0x0F)
        } else {
            None
        }
    }

    /// Encode into the fixed-width `MIDI_MSG` payload: `status, data1, data2, len`.
    #[must_use]
    pub const fn to_wire(&self) -> [u8; WIRE_SIZE] {
        [self.bytes[0], self.bytes[1], self.bytes[2], self.len]
    }

    /// Decode a `MIDI_MSG` payload, validating size and the status length table.
    pub fn from_wire(payload: &[u8]) -> crate::protocol::Result<Self> {
        let invalid = || crate::protocol::Error::InvalidMidiMessage {
            payload: payload.to_vec(),
        };
        let raw: [u8; WIRE_SIZE] = payload.try_into().map_err(|_| invalid())?;
        let [status, data1, data2, len] = raw;
        if message_len(status) != Some(len) {
            return Err(invalid());
        }
        Self::new(status, data1, data2).ok_or_else(invalid)
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for byte in self.as_bytes() {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
            first = false;
        }
        Ok(())
    }
}
