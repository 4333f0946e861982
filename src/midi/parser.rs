//! Running-status MIDI byte-stream parser.
//!
//! Reassembles complete messages and sysex blocks from a serial feed of raw bytes.
//! System real-time bytes may interleave anywhere, including inside a sysex capture or a
//! partially received channel message, without disturbing it.

use tracing::trace;

use super::{MidiMessage, SYSEX_BEGIN, SYSEX_END, is_channel, is_realtime, is_status, message_len};

/// Result of feeding one byte to the parser.
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed<'a> {
    /// More bytes are needed.
    None,
    /// A complete message.
    Message(MidiMessage),
    /// A complete sysex block including the 0xF0/0xF7 delimiters.
    Sysex(&'a [u8]),
    /// A sysex block ended but did not fit into the configured maximum.
    SysexTooLarge {
        /// Total size of the block including delimiters.
        size: usize,
    },
    /// The byte cannot start or continue any message and was discarded.
    Invalid(u8),
}

/// Per-port parser state.
#[derive(Debug)]
pub struct MidiParser {
    bytes_left: usize,
    next_offset: usize,
    pending: [u8; 3],
    pending_len: u8,
    running_status: Option<u8>,
    sysex: Vec<u8>,
    sysex_counted: usize,
    capturing: bool,
    max_sysex: usize,
}

impl MidiParser {
    /// Create a parser accepting sysex blocks of up to `max_sysex` bytes (delimiters included).
    ///
    /// The sysex buffer is allocated on the first 0xF0 seen.
    #[must_use]
    pub fn new(max_sysex: usize) -> Self {
        Self {
            bytes_left: 0,
            next_offset: 0,
            pending: [0; 3],
            pending_len: 0,
            running_status: None,
            sysex: Vec::new(),
            sysex_counted: 0,
            capturing: false,
            max_sysex,
        }
    }

    /// Configured sysex limit.
    #[must_use]
    pub const fn max_sysex(&self) -> usize {
        self.max_sysex
    }

    /// Whether a sysex capture is in progress.
    #[must_use]
    pub const fn in_sysex(&self) -> bool {
        self.capturing
    }

    /// Forget any partial message, capture and running status.
    pub fn reset(&mut self) {
        self.bytes_left = 0;
        self.next_offset = 0;
        self.running_status = None;
        self.abort_sysex();
    }

    /// Feed one byte.
    pub fn feed(&mut self, byte: u8) -> Parsed<'_> {
        if self.bytes_left > 0 {
            if is_realtime(byte) {
                return Self::realtime(byte);
            }
            if !is_status(byte) {
                return self.data_byte(byte);
            }
            trace!(status = byte, "status byte interrupted partial message");
            self.bytes_left = 0;
        }
        self.command(byte)
    }

    fn command(&mut self, byte: u8) -> Parsed<'_> {
        match byte {
            SYSEX_BEGIN => {
                self.begin_sysex();
                Parsed::None
            }
            SYSEX_END if self.capturing => self.end_sysex(),
            b if !is_status(b) && self.capturing => {
                self.push_sysex(b);
                Parsed::None
            }
            b if is_realtime(b) => Self::realtime(b),
            b if is_status(b) => {
                self.abort_sysex();
                self.status_byte(b)
            }
            b => self.running(b),
        }
    }

    fn realtime(byte: u8) -> Parsed<'static> {
        match message_len(byte) {
            Some(1) => Parsed::Message(MidiMessage::from_parts([byte, 0, 0], 1)),
            _ => Parsed::Invalid(byte),
        }
    }

    fn status_byte(&mut self, status: u8) -> Parsed<'_> {
        let Some(len) = message_len(status) else {
            trace!(status, "undefined status byte");
            self.running_status = None;
            return Parsed::Invalid(status);
        };
        self.running_status = is_channel(status).then_some(status);
        match self.start_message(status, len) {
            Some(msg) => Parsed::Message(msg),
            None => Parsed::None,
        }
    }

    fn running(&mut self, data: u8) -> Parsed<'_> {
        let Some(status) = self.running_status else {
            trace!(data, "data byte without running status");
            return Parsed::Invalid(data);
        };
        // running status is only ever a channel status, so the length is known
        let len = message_len(status).unwrap_or(1);
        if let Some(msg) = self.start_message(status, len) {
            return Parsed::Message(msg);
        }
        self.data_byte(data)
    }

    fn start_message(&mut self, status: u8, len: u8) -> Option<MidiMessage> {
        self.pending = [status, 0, 0];
        self.pending_len = len;
        if len == 1 {
            return Some(MidiMessage::from_parts(self.pending, 1));
        }
        self.bytes_left = usize::from(len) - 1;
        self.next_offset = 1;
        None
    }

    fn data_byte(&mut self, data: u8) -> Parsed<'_> {
        self.pending[self.next_offset] = data;
        self.next_offset += 1;
        self.bytes_left -= 1;
        if self.bytes_left == 0 {
            Parsed::Message(MidiMessage::from_parts(self.pending, self.pending_len))
        } else {
            Parsed::None
        }
    }

    fn begin_sysex(&mut self) {
        if self.sysex.capacity() == 0 {
            self.sysex.reserve_exact(self.max_sysex);
        }
        self.sysex.clear();
        self.sysex_counted = 0;
        self.capturing = true;
        self.running_status = None;
        self.push_sysex(SYSEX_BEGIN);
    }

    fn push_sysex(&mut self, byte: u8) {
        if self.sysex.len() < self.max_sysex {
            self.sysex.push(byte);
        }
        self.sysex_counted += 1;
    }

    fn end_sysex(&mut self) -> Parsed<'_> {
        self.push_sysex(SYSEX_END);
        self.capturing = false;
        let size = self.sysex_counted;
        self.sysex_counted = 0;
        trace!(size, max = self.max_sysex, "sysex end");
        if size > self.max_sysex {
            Parsed::SysexTooLarge { size }
        } else {
            Parsed::Sysex(&self.sysex)
        }
    }

    fn abort_sysex(&mut self) {
        self.capturing = false;
        self.sysex_counted = 0;
        self.sysex.clear();
    }
}
