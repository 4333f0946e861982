//! Packet header
//!
//! The header is 24 bytes of big-endian words and directly precedes the payload.

use std::time::{SystemTime, UNIX_EPOCH};

use super::{Command, Error, HEADER_SIZE, MAGIC, MAGIC_MASK, Result};

/// Sender wall-clock time carried in every packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Seconds since the Unix epoch (truncated to 32 bits)
    pub secs: u32,
    /// Microseconds within the second
    pub micros: u32,
}

impl Timestamp {
    /// Size of a timestamp echoed in a CLOCK reply payload.
    pub const SIZE: usize = 8;

    /// Create a timestamp from its parts
    #[must_use]
    pub const fn new(secs: u32, micros: u32) -> Self {
        Self { secs, micros }
    }

    /// Current wall-clock time
    #[must_use]
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Convert a system time, saturating at the 32-bit seconds limit
    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let secs = u32::try_from(duration.as_secs()).unwrap_or(u32::MAX);
        Self {
            secs,
            micros: duration.subsec_micros(),
        }
    }

    /// Total microseconds
    #[must_use]
    pub const fn as_micros(&self) -> u64 {
        self.secs as u64 * 1_000_000 + self.micros as u64
    }

    /// Encode for a CLOCK reply payload
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.secs.to_be_bytes());
        out[4..8].copy_from_slice(&self.micros.to_be_bytes());
        out
    }

    /// Decode from a CLOCK reply payload
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        Some(Self {
            secs: word(bytes, 0),
            micros: word(bytes, 4),
        })
    }
}

/// Packet header
///
/// # Wire Format
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            Magic "CAM" (3)                    |  Command (1)  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Port (4)                             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Sequence Number (4)                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    Timestamp Seconds (4)                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                  Timestamp Microseconds (4)                   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       Payload Size (4)                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    command: Command,
    port: u32,
    seq_num: u32,
    timestamp: Timestamp,
    payload_len: u32,
}

impl PacketHeader {
    /// Create a header stamped with the current time and an empty payload
    #[must_use]
    pub fn new(command: Command, port: u32, seq_num: u32) -> Self {
        Self::with_timestamp(command, port, seq_num, Timestamp::now())
    }

    /// Create a header with an explicit timestamp
    #[must_use]
    pub const fn with_timestamp(
        command: Command,
        port: u32,
        seq_num: u32,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            command,
            port,
            seq_num,
            timestamp,
            payload_len: 0,
        }
    }

    /// Get command
    #[must_use]
    pub const fn command(&self) -> Command {
        self.command
    }

    /// Get logical port index
    #[must_use]
    pub const fn port(&self) -> u32 {
        self.port
    }

    /// Get sequence number
    #[must_use]
    pub const fn seq_num(&self) -> u32 {
        self.seq_num
    }

    /// Get sender timestamp
    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Get payload length
    #[must_use]
    pub const fn payload_len(&self) -> u32 {
        self.payload_len
    }

    pub(crate) fn set_payload_len(&mut self, len: u32) {
        self.payload_len = len;
    }

    /// Convert to bytes (big-endian)
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];

        let words = [
            MAGIC | u32::from(self.command.as_u8()),
            self.port,
            self.seq_num,
            self.timestamp.secs,
            self.timestamp.micros,
            self.payload_len,
        ];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }

        bytes
    }

    /// Parse from bytes (big-endian), validating magic and command tag
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::PacketTooShort {
                needed: HEADER_SIZE,
                got: bytes.len(),
            });
        }

        let magic = word(bytes, 0);
        if magic & MAGIC_MASK != MAGIC {
            return Err(Error::NoMagic { found: magic });
        }
        let tag = magic.to_be_bytes()[3];
        let command = Command::from_u8(tag).ok_or(Error::WrongCommand { tag })?;

        Ok(Self {
            command,
            port: word(bytes, 4),
            seq_num: word(bytes, 8),
            timestamp: Timestamp::new(word(bytes, 12), word(bytes, 16)),
            payload_len: word(bytes, 20),
        })
    }
}

fn word(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
