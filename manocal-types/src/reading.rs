//! Live sensor readings

use chrono::{DateTime, Utc};
use std::fmt;

/// One decoded sample from a device's streaming pressure channel.
///
/// Overwritten in place on every notification; consumers that need history
/// must copy it out (the verification sweep does exactly that).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureSample {
    /// Decoded pressure value, in the instrument's configured unit
    pub value: f32,

    /// Receive timestamp
    pub at: DateTime<Utc>,
}

impl PressureSample {
    pub fn now(value: f32) -> Self {
        Self {
            value,
            at: Utc::now(),
        }
    }
}

impl fmt::Display for PressureSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} @ {}", self.value, self.at.format("%H:%M:%S%.3f"))
    }
}
