//! Typed request/response layer over raw packets
//!
//! Calibration callers work with these enums instead of assembling payload
//! bytes by hand; field offsets and endianness live in one place
//! ([`Packet`]).

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::{
    command::Command,
    constants::MAX_NAME_SIZE,
    error::{Error, Result},
    packet::Packet,
};

/// A command to send to a device, with its typed parameters
#[derive(Debug, Clone, PartialEq)]
pub enum CalRequest {
    /// Read the user-assigned display name
    ReadDeviceName,

    /// Write the user-assigned display name (at most 12 UTF-8 bytes)
    WriteDeviceName(String),

    /// Read the zero offset; the device re-zeroes against ambient as a
    /// side effect, which is how the zero calibration phase is driven
    ReadZeroOffset,

    /// Store the lower calibration point at the given reference pressure
    WriteLowerCal(i32),

    /// Read back the stored lower calibration point
    ReadLowerCal,

    /// Store the upper calibration point at the given reference pressure
    WriteUpperCal(i32),

    /// Read back the stored upper calibration point
    ReadUpperCal,

    /// Reset the measurement subsystem without dropping the link
    SoftReset,
}

impl CalRequest {
    /// The wire command this request maps to
    pub fn command(&self) -> Command {
        match self {
            Self::ReadDeviceName => Command::ReadDeviceName,
            Self::WriteDeviceName(_) => Command::WriteDeviceName,
            Self::ReadZeroOffset => Command::ReadZeroOffset,
            Self::WriteLowerCal(_) => Command::WriteLowerCal,
            Self::ReadLowerCal => Command::ReadLowerCal,
            Self::WriteUpperCal(_) => Command::WriteUpperCal,
            Self::ReadUpperCal => Command::ReadUpperCal,
            Self::SoftReset => Command::SoftReset,
        }
    }

    /// Encode to the fixed 20-byte wire form
    pub fn encode(&self) -> Result<BytesMut> {
        let packet = match self {
            Self::WriteDeviceName(name) => {
                if name.len() > MAX_NAME_SIZE {
                    return Err(Error::PayloadTooLarge {
                        size: name.len(),
                        max: MAX_NAME_SIZE,
                    });
                }
                Packet::with_payload(self.command(), Bytes::copy_from_slice(name.as_bytes()))
            }
            Self::WriteLowerCal(value) | Self::WriteUpperCal(value) => {
                Packet::with_value(self.command(), *value)
            }
            _ => Packet::new(self.command()),
        };

        packet.encode()
    }
}

/// A decoded device response
#[derive(Debug, Clone, PartialEq)]
pub enum CalResponse {
    /// Display name read back from the device
    DeviceName(String),

    /// Signed raw value (zero offset or a stored/echoed calibration point)
    RawValue(i32),

    /// Bare acknowledgement with no payload of interest
    Ack,
}

impl CalResponse {
    /// Decode a response to `expected`, validating framing and identity
    ///
    /// # Errors
    ///
    /// Propagates [`Error::ProtocolMismatch`] when the response's command
    /// id or server id does not match what was expected.
    pub fn decode(expected: Command, buf: &[u8]) -> Result<Self> {
        let packet = Packet::decode_response(expected, buf)?;

        trace!(command = %packet.command, "decoded response");

        let response = match expected {
            Command::ReadDeviceName | Command::WriteDeviceName => {
                Self::DeviceName(packet.text())
            }
            cmd if cmd.carries_value() => Self::RawValue(packet.value()),
            _ => Self::Ack,
        };

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_upper_cal_roundtrip() {
        // Encode the write, then decode a synthetic response echoing the
        // raw value, as the device does.
        let encoded = CalRequest::WriteUpperCal(250).encode().unwrap();
        let response = CalResponse::decode(Command::WriteUpperCal, &encoded).unwrap();

        assert_eq!(response, CalResponse::RawValue(250));
    }

    #[test]
    fn test_zero_offset_negative() {
        let synthetic = Packet::with_value(Command::ReadZeroOffset, -7).encode().unwrap();
        let response = CalResponse::decode(Command::ReadZeroOffset, &synthetic).unwrap();

        assert_eq!(response, CalResponse::RawValue(-7));
    }

    #[test]
    fn test_device_name_roundtrip() {
        let encoded = CalRequest::WriteDeviceName("PT-7".into()).encode().unwrap();
        let response = CalResponse::decode(Command::WriteDeviceName, &encoded).unwrap();

        assert_eq!(response, CalResponse::DeviceName("PT-7".into()));
    }

    #[test]
    fn test_name_too_long() {
        let result = CalRequest::WriteDeviceName("THIRTEEN-BYTE".into()).encode();
        assert!(matches!(result, Err(Error::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_soft_reset_acks() {
        let synthetic = Packet::new(Command::SoftReset).encode().unwrap();
        let response = CalResponse::decode(Command::SoftReset, &synthetic).unwrap();

        assert_eq!(response, CalResponse::Ack);
    }

    #[test]
    fn test_mismatched_response_rejected() {
        let synthetic = Packet::with_value(Command::ReadUpperCal, 250).encode().unwrap();
        let result = CalResponse::decode(Command::WriteUpperCal, &synthetic);

        assert!(matches!(result, Err(Error::ProtocolMismatch { .. })));
    }
}
