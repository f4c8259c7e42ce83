//! Calibration protocol packet structure and encoding/decoding

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::{
    command::Command,
    constants::{
        LENGTH_OFFSET, MAX_PAYLOAD_SIZE, PACKET_SIZE, PAYLOAD_OFFSET, SERVER_ID, SERVER_ID_OFFSET,
    },
    error::{Error, Result},
};

/// Calibration protocol packet
///
/// # Packet Structure
///
/// ```text
/// ┌─────────────┬─────────────┬──────────────┬─────────────┬─────────────┐
/// │   Command   │   Length    │   Payload    │  Server ID  │   Padding   │
/// │   2 bytes   │   1 byte    │   12 bytes   │   1 byte    │   4 bytes   │
/// │  (BE u16)   │ (always 20) │ (zero-padded)│   (0x21)    │   (zero)    │
/// └─────────────┴─────────────┴──────────────┴─────────────┴─────────────┘
/// ```
///
/// Every packet is exactly 20 bytes on the wire, requests and responses
/// alike. Numeric payload fields are big-endian signed 32-bit integers.
///
/// # Examples
///
/// ```
/// use manocal_core::{Command, Packet};
///
/// let packet = Packet::new(Command::SoftReset);
/// let encoded = packet.encode().unwrap();
/// assert_eq!(encoded.len(), Packet::SIZE);
///
/// let decoded = Packet::decode(&encoded).unwrap();
/// assert_eq!(decoded.command, Command::SoftReset);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// Command code
    pub command: Command,

    /// Packet payload (command-specific data, at most 12 bytes)
    pub payload: Bytes,
}

impl Packet {
    /// Fixed packet size in bytes
    pub const SIZE: usize = PACKET_SIZE;

    /// Create a new packet with empty payload
    pub fn new(command: Command) -> Self {
        Self {
            command,
            payload: Bytes::new(),
        }
    }

    /// Create a packet with payload
    pub fn with_payload(command: Command, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// Create a packet whose payload is one big-endian signed 32-bit value
    pub fn with_value(command: Command, value: i32) -> Self {
        Self {
            command,
            payload: Bytes::copy_from_slice(&value.to_be_bytes()),
        }
    }

    /// Encode packet to its fixed 20-byte wire form
    ///
    /// # Errors
    ///
    /// Returns [`Error::PayloadTooLarge`] when the payload does not fit the
    /// 12-byte payload window.
    pub fn encode(&self) -> Result<BytesMut> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(PACKET_SIZE);

        buf.put_u16(self.command.into());
        buf.put_u8(PACKET_SIZE as u8);
        buf.put_slice(&self.payload);
        // Zero-fill the rest of the payload window
        buf.resize(SERVER_ID_OFFSET, 0);
        buf.put_u8(SERVER_ID);
        buf.resize(PACKET_SIZE, 0);

        Ok(buf)
    }

    /// Decode a packet from its wire form, validating framing
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Buffer is not exactly 20 bytes ([`Error::PacketTooShort`])
    /// - The length constant or server id byte is wrong
    ///   ([`Error::ProtocolMismatch`])
    /// - The command id is unknown ([`Error::UnsupportedCommand`])
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != PACKET_SIZE {
            return Err(Error::PacketTooShort {
                expected: PACKET_SIZE,
                actual: buf.len(),
            });
        }

        let command_raw = BigEndian::read_u16(&buf[..2]);
        let command = Command::try_from(command_raw)?;

        if buf[LENGTH_OFFSET] != PACKET_SIZE as u8 {
            return Err(Error::ProtocolMismatch {
                field: "length constant",
                expected: PACKET_SIZE as u16,
                actual: buf[LENGTH_OFFSET] as u16,
            });
        }

        if buf[SERVER_ID_OFFSET] != SERVER_ID {
            return Err(Error::ProtocolMismatch {
                field: "server id",
                expected: SERVER_ID as u16,
                actual: buf[SERVER_ID_OFFSET] as u16,
            });
        }

        Ok(Self {
            command,
            payload: Bytes::copy_from_slice(&buf[PAYLOAD_OFFSET..SERVER_ID_OFFSET]),
        })
    }

    /// Decode a response packet, additionally validating that it answers
    /// the command we sent
    ///
    /// A response for a different command is never silently accepted; it
    /// surfaces as [`Error::ProtocolMismatch`] so the caller can retry or
    /// drop the device.
    pub fn decode_response(expected: Command, buf: &[u8]) -> Result<Self> {
        let packet = Self::decode(buf)?;

        if packet.command != expected {
            return Err(Error::ProtocolMismatch {
                field: "command id",
                expected: expected.into(),
                actual: packet.command.into(),
            });
        }

        Ok(packet)
    }

    /// Read the payload's leading big-endian signed 32-bit value
    ///
    /// Sign extension is exact: negative zero offsets survive the trip.
    pub fn value(&self) -> i32 {
        BigEndian::read_i32(&self.payload[..4])
    }

    /// Read the payload as a NUL-padded UTF-8 string
    pub fn text(&self) -> String {
        let end = self
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.payload.len());
        String::from_utf8_lossy(&self.payload[..end]).into_owned()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("command", &self.command)
            .field("payload", &hex::encode(&self.payload))
            .finish()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Packet[{}](len={})", self.command, self.payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_packet_encode_shape() {
        let packet = Packet::with_value(Command::WriteUpperCal, 250);
        let encoded = packet.encode().unwrap();

        assert_eq!(encoded.len(), PACKET_SIZE);
        assert_eq!(&encoded[..2], &[0x02, 0x04]); // command, big-endian
        assert_eq!(encoded[LENGTH_OFFSET], 20);
        assert_eq!(&encoded[PAYLOAD_OFFSET..PAYLOAD_OFFSET + 4], &[0, 0, 0, 250]);
        assert_eq!(encoded[SERVER_ID_OFFSET], SERVER_ID);
    }

    #[test]
    fn test_packet_roundtrip() {
        let original = Packet::with_value(Command::WriteUpperCal, 250);
        let encoded = original.encode().unwrap();
        let decoded = Packet::decode_response(Command::WriteUpperCal, &encoded).unwrap();

        assert_eq!(decoded.command, Command::WriteUpperCal);
        assert_eq!(decoded.value(), 250);
    }

    #[test]
    fn test_negative_value_sign_extension() {
        let packet = Packet::with_value(Command::ReadZeroOffset, -42);
        let encoded = packet.encode().unwrap();
        let decoded = Packet::decode(&encoded).unwrap();

        assert_eq!(decoded.value(), -42);
    }

    #[test]
    fn test_command_mismatch_rejected() {
        let encoded = Packet::with_value(Command::WriteLowerCal, 0).encode().unwrap();
        let result = Packet::decode_response(Command::WriteUpperCal, &encoded);

        assert!(matches!(
            result,
            Err(Error::ProtocolMismatch {
                field: "command id",
                ..
            })
        ));
    }

    #[test]
    fn test_server_id_mismatch_rejected() {
        let mut encoded = Packet::new(Command::SoftReset).encode().unwrap();
        encoded[SERVER_ID_OFFSET] = 0x7F;

        let result = Packet::decode_response(Command::SoftReset, &encoded);
        assert!(matches!(
            result,
            Err(Error::ProtocolMismatch {
                field: "server id",
                ..
            })
        ));
    }

    #[test]
    fn test_wrong_size_rejected() {
        let result = Packet::decode(&[0x01, 0x01, 20]);
        assert!(matches!(result, Err(Error::PacketTooShort { .. })));
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut encoded = Packet::new(Command::SoftReset).encode().unwrap();
        encoded[0] = 0x7F;

        let result = Packet::decode(&encoded);
        assert!(matches!(result, Err(Error::UnsupportedCommand(_))));
    }

    #[test]
    fn test_payload_too_large() {
        let packet = Packet::with_payload(Command::WriteDeviceName, vec![0x41; 13]);
        assert!(matches!(
            packet.encode(),
            Err(Error::PayloadTooLarge { size: 13, max: 12 })
        ));
    }

    #[test]
    fn test_text_payload_nul_trimmed() {
        let packet = Packet::with_payload(Command::ReadDeviceName, &b"PT-7\0\0\0\0\0\0\0\0"[..]);
        let encoded = packet.encode().unwrap();
        let decoded = Packet::decode(&encoded).unwrap();

        assert_eq!(decoded.text(), "PT-7");
    }

    proptest! {
        #[test]
        fn prop_value_roundtrip(value in any::<i32>()) {
            let encoded = Packet::with_value(Command::ReadLowerCal, value).encode().unwrap();
            let decoded = Packet::decode(&encoded).unwrap();
            prop_assert_eq!(decoded.value(), value);
        }
    }
}
