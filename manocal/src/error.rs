//! Engine error types
//!
//! Every message is written for the operator: device name, operation,
//! root cause. Nothing here surfaces as a bare trace.

use manocal_types::{DeviceId, DeviceStatus};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Codec(#[from] manocal_core::Error),

    #[error("Link error: {0}")]
    Link(#[from] manocal_transport::Error),

    /// The link died mid-command. Short-circuits retries: a dead link
    /// cannot answer on the next attempt either.
    #[error("Device {device} disconnected")]
    DeviceDisconnected { device: DeviceId },

    #[error("Device {device}: {command} failed after {attempts} attempts: {cause}")]
    RetriesExhausted {
        device: DeviceId,
        command: &'static str,
        attempts: u32,
        cause: String,
    },

    /// The reference controller could not be driven. Fatal to the whole
    /// run, not isolated to a device.
    #[error("Reference controller failure: {0}")]
    ReferenceControllerFailure(String),

    #[error("No devices remaining in batch")]
    NoDevicesRemaining,

    #[error("Setup already in progress")]
    SetupInProgress,

    #[error("Calibration already in progress")]
    CalibrationInProgress,

    #[error("Verification already in progress")]
    VerificationInProgress,

    #[error("Run stopped")]
    Stopped,

    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("Device {device} is {status}, expected ready")]
    NotReady {
        device: DeviceId,
        status: DeviceStatus,
    },
}

impl Error {
    /// Check if the error means the device's link is gone
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::DeviceDisconnected { .. } => true,
            Self::Link(e) => e.is_disconnect(),
            _ => false,
        }
    }

    /// Check if the error ends the whole run rather than one device
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ReferenceControllerFailure(_) | Self::NoDevicesRemaining | Self::Stopped
        )
    }
}
