//! Calibration protocol command definitions

use std::fmt;

use crate::error::{Error, Result};

/// Protocol command codes
///
/// Ids are grouped by subsystem page: `0x01xx` identity, `0x02xx`
/// calibration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    // Identity
    ReadDeviceName = 0x0101,
    WriteDeviceName = 0x0102,

    // Calibration
    ReadZeroOffset = 0x0201,
    WriteLowerCal = 0x0202,
    ReadLowerCal = 0x0203,
    WriteUpperCal = 0x0204,
    ReadUpperCal = 0x0205,
    SoftReset = 0x02F0,
}

impl Command {
    /// Check if this command writes device state
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::WriteDeviceName | Self::WriteLowerCal | Self::WriteUpperCal | Self::SoftReset
        )
    }

    /// Check if the response payload carries a signed 32-bit value
    pub fn carries_value(self) -> bool {
        matches!(
            self,
            Self::ReadZeroOffset
                | Self::WriteLowerCal
                | Self::ReadLowerCal
                | Self::WriteUpperCal
                | Self::ReadUpperCal
        )
    }

    /// Get command name
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadDeviceName => "READ_DEVICE_NAME",
            Self::WriteDeviceName => "WRITE_DEVICE_NAME",
            Self::ReadZeroOffset => "READ_ZERO_OFFSET",
            Self::WriteLowerCal => "WRITE_LOWER_CAL",
            Self::ReadLowerCal => "READ_LOWER_CAL",
            Self::WriteUpperCal => "WRITE_UPPER_CAL",
            Self::ReadUpperCal => "READ_UPPER_CAL",
            Self::SoftReset => "SOFT_RESET",
        }
    }
}

impl From<Command> for u16 {
    fn from(cmd: Command) -> u16 {
        cmd as u16
    }
}

impl TryFrom<u16> for Command {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0x0101 => Ok(Self::ReadDeviceName),
            0x0102 => Ok(Self::WriteDeviceName),
            0x0201 => Ok(Self::ReadZeroOffset),
            0x0202 => Ok(Self::WriteLowerCal),
            0x0203 => Ok(Self::ReadLowerCal),
            0x0204 => Ok(Self::WriteUpperCal),
            0x0205 => Ok(Self::ReadUpperCal),
            0x02F0 => Ok(Self::SoftReset),
            _ => Err(Error::UnsupportedCommand(value)),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:04X})", self.name(), *self as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_conversion() {
        assert_eq!(u16::from(Command::WriteUpperCal), 0x0204);
        assert_eq!(Command::try_from(0x0204).unwrap(), Command::WriteUpperCal);
    }

    #[test]
    fn test_command_is_write() {
        assert!(Command::WriteLowerCal.is_write());
        assert!(Command::SoftReset.is_write());
        assert!(!Command::ReadZeroOffset.is_write());
    }

    #[test]
    fn test_command_carries_value() {
        assert!(Command::ReadZeroOffset.carries_value());
        assert!(Command::WriteUpperCal.carries_value());
        assert!(!Command::ReadDeviceName.carries_value());
        assert!(!Command::SoftReset.carries_value());
    }

    #[test]
    fn test_unsupported_command() {
        let result = Command::try_from(0x0999);
        assert!(matches!(result, Err(Error::UnsupportedCommand(0x0999))));
    }
}
