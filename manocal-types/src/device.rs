//! Device identity, lifecycle status, and descriptive metadata

use std::fmt;

/// Stable external identifier for a managed instrument.
///
/// Assigned by whatever discovered the device (advertising name, MAC,
/// platform UUID) and never reinterpreted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a managed device.
///
/// Transitions are recorded as append-only metadata: any state may follow
/// any state, so that externally-forced resets (power cycle, manual
/// reconnect) never wedge the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Registered, not yet touched by setup
    Pending,

    /// Link is being (re)established
    Connecting,

    /// Endpoint discovery in progress
    Discovering,

    /// Streaming subscription being installed
    Subscribing,

    /// Fully set up and streaming
    Ready,

    /// A calibration phase is acting on the device
    Calibrating,

    /// A verification sweep is sampling the device
    Verifying,

    /// Setup or calibration gave up on the device
    Failed,

    /// Link dropped out from under us
    Disconnected,
}

impl DeviceStatus {
    /// States in which the calibration and verification engines may touch
    /// the device's cached endpoints.
    pub fn is_operational(self) -> bool {
        matches!(self, Self::Ready | Self::Calibrating | Self::Verifying)
    }

    /// States the setup orchestrator still owes work for.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Connecting | Self::Discovering | Self::Subscribing
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connecting => "connecting",
            Self::Discovering => "discovering",
            Self::Subscribing => "subscribing",
            Self::Ready => "ready",
            Self::Calibrating => "calibrating",
            Self::Verifying => "verifying",
            Self::Failed => "failed",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Observed quality of the wireless link to a device.
///
/// Collapses the connected/discoverable combinations into one explicit
/// lattice instead of two loosely-coupled booleans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    /// Link up and endpoints resolvable
    Healthy,

    /// Link up but endpoint discovery does not complete
    Undiscoverable,

    /// Link is gone
    Down,

    /// Never probed
    Unknown,
}

impl LinkHealth {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Healthy | Self::Undiscoverable)
    }
}

/// Descriptive metadata read from a device during setup.
///
/// Every field is best-effort: a transmitter with old firmware may expose
/// none of them, and setup succeeds regardless.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMetadata {
    /// Firmware revision string
    pub firmware_version: Option<String>,

    /// User-assigned display name
    pub display_name: Option<String>,

    /// Factory serial number
    pub serial_number: Option<String>,

    /// Model number
    pub model_number: Option<String>,
}

impl DeviceMetadata {
    pub fn is_empty(&self) -> bool {
        self.firmware_version.is_none()
            && self.display_name.is_none()
            && self.serial_number.is_none()
            && self.model_number.is_none()
    }
}

impl fmt::Display for DeviceMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device[SN: {}, FW: {}]",
            self.serial_number.as_deref().unwrap_or("?"),
            self.firmware_version.as_deref().unwrap_or("?"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(DeviceStatus::Ready.is_operational());
        assert!(DeviceStatus::Calibrating.is_operational());
        assert!(!DeviceStatus::Failed.is_operational());
        assert!(DeviceStatus::Pending.is_transitional());
        assert!(!DeviceStatus::Disconnected.is_transitional());
    }

    #[test]
    fn test_link_health() {
        assert!(LinkHealth::Healthy.is_connected());
        assert!(LinkHealth::Undiscoverable.is_connected());
        assert!(!LinkHealth::Down.is_connected());
        assert!(!LinkHealth::Unknown.is_connected());
    }

    #[test]
    fn test_metadata_display() {
        let mut meta = DeviceMetadata::default();
        assert!(meta.is_empty());
        assert_eq!(meta.to_string(), "Device[SN: ?, FW: ?]");

        meta.serial_number = Some("PT-0042".into());
        meta.firmware_version = Some("2.1.0".into());
        assert_eq!(meta.to_string(), "Device[SN: PT-0042, FW: 2.1.0]");
    }
}
