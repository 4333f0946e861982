//! Packet codec (encode/decode)
//!
//! Encoding writes into a caller-owned buffer so the transport can reuse a single
//! transmit buffer. Decoding borrows the payload straight out of the receive buffer.

use super::{Error, HEADER_SIZE, PacketHeader, Result};

/// Encode a packet into `out`, returning the number of bytes written
///
/// # Format
///
/// ```text
/// [HEADER (24 bytes)] [PAYLOAD (payload_size bytes)]
/// ```
///
/// The payload length field of `header` is taken from `payload`.
pub fn encode_into(header: &PacketHeader, payload: &[u8], out: &mut [u8]) -> Result<usize> {
    let payload_len = u32::try_from(payload.len()).map_err(|_| Error::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    let total_size = HEADER_SIZE + payload.len();
    if out.len() < total_size {
        return Err(Error::BufferTooSmall {
            needed: total_size,
            got: out.len(),
        });
    }

    let mut header = *header;
    header.set_payload_len(payload_len);
    out[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
    out[HEADER_SIZE..total_size].copy_from_slice(payload);

    Ok(total_size)
}

/// Encode a packet into a freshly allocated vector
#[must_use]
pub fn encode(header: &PacketHeader, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; HEADER_SIZE + payload.len()];
    // the vector is sized exactly, so only a >4 GiB payload can fail
    match encode_into(header, payload, &mut bytes) {
        Ok(len) => bytes.truncate(len),
        Err(_) => bytes.clear(),
    }
    bytes
}

/// Decode a datagram into its header and payload
///
/// # Errors
///
/// Returns an error if:
/// - The datagram is shorter than the header
/// - The magic prefix is missing
/// - The command tag is unknown
/// - The declared payload size differs from the bytes actually received
pub fn decode(bytes: &[u8]) -> Result<(PacketHeader, &[u8])> {
    let header = PacketHeader::from_bytes(bytes)?;

    let actual = bytes.len() - HEADER_SIZE;
    if usize::try_from(header.payload_len()).ok() != Some(actual) {
        return Err(Error::WrongSize {
            declared: header.payload_len(),
            actual,
        });
    }

    Ok((header, &bytes[HEADER_SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Command, DEFAULT_MAX_SYSEX, MAGIC, Timestamp};

    fn header(command: Command) -> PacketHeader {
        PacketHeader::with_timestamp(command, 2, 77, Timestamp::new(1_700_000_000, 250))
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let payload = [0x90, 0x40, 0x60, 3];
        let encoded = encode(&header(Command::MidiMsg), &payload);
        assert_eq!(encoded.len(), HEADER_SIZE + 4);

        let (decoded, data) = decode(&encoded).unwrap();
        assert_eq!(decoded.command(), Command::MidiMsg);
        assert_eq!(decoded.port(), 2);
        assert_eq!(decoded.seq_num(), 77);
        assert_eq!(decoded.payload_len(), 4);
        assert_eq!(data, &payload);
    }

    #[test]
    fn test_encode_into_reports_small_buffer() {
        let mut out = [0u8; HEADER_SIZE + 1];
        let result = encode_into(&header(Command::MidiSysex), &[0xF0, 0x01, 0xF7], &mut out);
        assert_eq!(
            result,
            Err(Error::BufferTooSmall {
                needed: HEADER_SIZE + 3,
                got: HEADER_SIZE + 1
            })
        );
    }

    #[test]
    fn test_encode_into_reuses_buffer() {
        let mut out = vec![0u8; 64];
        let long = encode_into(&header(Command::MidiSysex), &[1; 20], &mut out).unwrap();
        let short = encode_into(&header(Command::Clock), &[], &mut out).unwrap();
        assert_eq!(long, HEADER_SIZE + 20);
        assert_eq!(short, HEADER_SIZE);
        let (decoded, data) = decode(&out[..short]).unwrap();
        assert_eq!(decoded.command(), Command::Clock);
        assert!(data.is_empty());
    }

    #[test]
    fn test_decode_wrong_size() {
        let mut encoded = encode(&header(Command::MidiSysex), &[0xF0, 0x01, 0xF7]);
        encoded.pop();
        assert_eq!(
            decode(&encoded).unwrap_err(),
            Error::WrongSize {
                declared: 3,
                actual: 2
            }
        );

        let mut padded = encode(&header(Command::Exit), &[]);
        padded.push(0);
        assert!(matches!(decode(&padded), Err(Error::WrongSize { .. })));
    }

    #[test]
    fn test_decode_too_short() {
        let result = decode(&[0x43, 0x41, 0x4D]);
        assert!(matches!(result, Err(Error::PacketTooShort { got: 3, .. })));
    }

    #[test]
    fn test_decode_legacy_data_command_rejected() {
        // 'D' belonged to an earlier revision of the protocol
        let mut encoded = encode(&header(Command::MidiMsg), &[0; 4]);
        encoded[0..4].copy_from_slice(&(MAGIC | u32::from(b'D')).to_be_bytes());
        assert_eq!(decode(&encoded).unwrap_err(), Error::WrongCommand { tag: b'D' });
    }

    // Property-based tests
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn command_strategy() -> impl Strategy<Value = Command> {
            prop_oneof![
                Just(Command::Invite),
                Just(Command::InviteOk),
                Just(Command::InviteNo),
                Just(Command::Exit),
                Just(Command::Clock),
                Just(Command::MidiMsg),
                Just(Command::MidiSysex),
            ]
        }

        proptest! {
            /// Property: header fields and payload survive encode/decode for every size
            #[test]
            fn prop_roundtrip_preserves_packet(
                command in command_strategy(),
                port in any::<u32>(),
                seq in any::<u32>(),
                secs in any::<u32>(),
                micros in 0u32..1_000_000,
                payload in prop::collection::vec(any::<u8>(), 0..=DEFAULT_MAX_SYSEX),
            ) {
                let header = PacketHeader::with_timestamp(command, port, seq, Timestamp::new(secs, micros));
                let encoded = encode(&header, &payload);
                let (decoded, data) = decode(&encoded).unwrap();

                prop_assert_eq!(decoded.command(), command);
                prop_assert_eq!(decoded.port(), port);
                prop_assert_eq!(decoded.seq_num(), seq);
                prop_assert_eq!(decoded.timestamp(), Timestamp::new(secs, micros));
                prop_assert_eq!(data, payload.as_slice());
            }

            /// Property: a wrong magic prefix is always rejected
            #[test]
            fn prop_invalid_magic_rejected(prefix in any::<u32>().prop_filter("not magic", |m| m & 0xFFFF_FF00 != MAGIC)) {
                let mut encoded = encode(&header(Command::Clock), &[]);
                encoded[0..4].copy_from_slice(&prefix.to_be_bytes());
                prop_assert!(decode(&encoded).is_err());
            }

            /// Property: truncating a packet never decodes successfully
            #[test]
            fn prop_truncation_detected(
                payload in prop::collection::vec(any::<u8>(), 1..256),
                cut in 1usize..256,
            ) {
                let encoded = encode(&header(Command::MidiSysex), &payload);
                let cut = cut.min(encoded.len());
                prop_assert!(decode(&encoded[..encoded.len() - cut]).is_err());
            }
        }
    }
}
