//! Owned packet

use bytes::Bytes;

use super::{Command, PacketHeader, Timestamp};

/// A decoded packet that owns its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header
    header: PacketHeader,
    /// Packet payload
    payload: Bytes,
}

impl Packet {
    /// Create a new packet stamped with the current time
    pub fn new(command: Command, port: u32, seq_num: u32, payload: impl Into<Bytes>) -> Self {
        Self::with_timestamp(command, port, seq_num, Timestamp::now(), payload)
    }

    /// Create a new packet with an explicit timestamp
    pub fn with_timestamp(
        command: Command,
        port: u32,
        seq_num: u32,
        timestamp: Timestamp,
        payload: impl Into<Bytes>,
    ) -> Self {
        let payload = payload.into();
        let mut header = PacketHeader::with_timestamp(command, port, seq_num, timestamp);
        header.set_payload_len(u32::try_from(payload.len()).unwrap_or(u32::MAX));
        Self { header, payload }
    }

    /// Get command
    #[must_use]
    pub const fn command(&self) -> Command {
        self.header.command()
    }

    /// Get logical port index
    #[must_use]
    pub const fn port(&self) -> u32 {
        self.header.port()
    }

    /// Get sequence number
    #[must_use]
    pub const fn seq_num(&self) -> u32 {
        self.header.seq_num()
    }

    /// Get payload
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Get header
    #[must_use]
    pub const fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Encode packet to bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        super::encode(&self.header, &self.payload)
    }

    /// Decode packet from bytes, copying the payload
    pub fn decode(bytes: &[u8]) -> super::Result<Self> {
        let (header, payload) = super::decode(bytes)?;
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_creation() {
        let packet = Packet::new(Command::MidiSysex, 1, 9, vec![0xF0, 0x7E, 0xF7]);

        assert_eq!(packet.command(), Command::MidiSysex);
        assert_eq!(packet.payload().as_ref(), &[0xF0, 0x7E, 0xF7]);
        assert_eq!(packet.header().payload_len(), 3);
    }

    #[test]
    fn test_packet_roundtrip() {
        let original = Packet::with_timestamp(
            Command::Clock,
            0,
            42,
            Timestamp::new(5, 6),
            Bytes::from_static(&[0, 0, 0, 1, 0, 0, 0, 2]),
        );
        let decoded = Packet::decode(&original.encode()).unwrap();

        assert_eq!(decoded, original);
        assert_eq!(decoded.seq_num(), 42);
        assert_eq!(decoded.port(), 0);
    }
}
