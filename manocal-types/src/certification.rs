//! Verification sweep records and pass/fail certification

use chrono::{DateTime, Utc};
use std::fmt;

use crate::device::DeviceId;

/// One captured point of a verification sweep: what the reference
/// controller was holding versus what the device streamed.
///
/// Points are appended during the sweep and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPoint {
    /// Device the reading came from
    pub device: DeviceId,

    /// Pressure the reference controller reported holding
    pub reference_pressure: f32,

    /// Most recent streamed reading from the device at capture time
    pub device_reading: f32,

    /// Capture timestamp
    pub at: DateTime<Utc>,
}

impl SweepPoint {
    pub fn new(device: DeviceId, reference_pressure: f32, device_reading: f32) -> Self {
        Self {
            device,
            reference_pressure,
            device_reading,
            at: Utc::now(),
        }
    }

    /// Absolute discrepancy between the device and the reference.
    pub fn discrepancy(&self) -> f32 {
        (self.device_reading - self.reference_pressure).abs()
    }
}

/// Pass/fail outcome of comparing one device's sweep readings against the
/// reference.
///
/// Recomputed once per verification run and handed to the reporting
/// collaborator; nothing in the engine persists it.
#[derive(Debug, Clone, PartialEq)]
pub struct Certification {
    /// True iff the mean absolute discrepancy is within tolerance
    pub certified: bool,

    /// Mean absolute discrepancy across all captured points
    pub mean_discrepancy: f32,

    /// Human-readable explanation of the outcome
    pub reason: String,

    /// Number of points the verdict is based on
    pub total_readings: usize,
}

impl Certification {
    /// Derive a certification from a device's sweep points.
    ///
    /// A device with no captured points is never certified; an empty mean
    /// would otherwise read as a perfect score.
    pub fn from_points(points: &[SweepPoint], tolerance: f32) -> Self {
        if points.is_empty() {
            return Self {
                certified: false,
                mean_discrepancy: 0.0,
                reason: "no readings captured during sweep".to_owned(),
                total_readings: 0,
            };
        }

        let mean: f32 =
            points.iter().map(SweepPoint::discrepancy).sum::<f32>() / points.len() as f32;
        let certified = mean <= tolerance;

        let reason = if certified {
            format!(
                "mean discrepancy {:.2} within tolerance {:.2}",
                mean, tolerance
            )
        } else {
            format!(
                "mean discrepancy {:.2} exceeds tolerance {:.2}",
                mean, tolerance
            )
        };

        Self {
            certified,
            mean_discrepancy: mean,
            reason,
            total_readings: points.len(),
        }
    }
}

impl fmt::Display for Certification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} readings, {})",
            if self.certified { "CERTIFIED" } else { "REJECTED" },
            self.total_readings,
            self.reason
        )
    }
}
