//! Packet command tags

use std::fmt;

/// Command carried in the low byte of the magic word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Invitation to connect
    Invite = b'I',
    /// Invitation accepted
    InviteOk = b'O',
    /// Invitation rejected (already connected)
    InviteNo = b'N',
    /// Peer leaves
    Exit = b'E',
    /// Keepalive ping/pong
    Clock = b'C',

    /// A single MIDI message
    MidiMsg = b'M',
    /// A complete sysex block
    MidiSysex = b'S',
}

impl Command {
    /// Convert from byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(Self::Invite),
            b'O' => Some(Self::InviteOk),
            b'N' => Some(Self::InviteNo),
            b'E' => Some(Self::Exit),
            b'C' => Some(Self::Clock),
            b'M' => Some(Self::MidiMsg),
            b'S' => Some(Self::MidiSysex),
            _ => None,
        }
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if this command carries MIDI data for a port
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::MidiMsg | Self::MidiSysex)
    }

    /// Check if this command belongs to the invitation handshake
    #[must_use]
    pub const fn is_handshake(self) -> bool {
        matches!(self, Self::Invite | Self::InviteOk | Self::InviteNo)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invite => "INV",
            Self::InviteOk => "INV_OK",
            Self::InviteNo => "INV_NO",
            Self::Exit => "EXIT",
            Self::Clock => "CLOCK",
            Self::MidiMsg => "MIDI_MSG",
            Self::MidiSysex => "MIDI_SYSEX",
        };
        write!(f, "{name}")
    }
}
