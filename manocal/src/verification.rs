//! Post-calibration verification sweep
//!
//! Steps the reference controller up and back down a pressure ladder,
//! capturing every device's live streamed reading at each rung, then
//! certifies each device on the mean absolute discrepancy against the
//! reference. The reference controller is returned to zero pressure on
//! every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{info, warn};

use manocal_types::{Certification, DeviceId, DeviceStatus, SweepPoint};

use crate::{
    context::Context,
    error::{Error, Result},
    event::Event,
};

/// Ladder fractions of the maximum sweep pressure: up in quarters, then
/// back down
const LADDER_FRACTIONS: [f32; 9] = [0.0, 0.25, 0.5, 0.75, 1.0, 0.75, 0.5, 0.25, 0.0];

/// Target pressures for a verification sweep up to `max_pressure`
pub fn sweep_ladder(max_pressure: f32) -> Vec<f32> {
    LADDER_FRACTIONS.iter().map(|f| f * max_pressure).collect()
}

/// Everything a verification run produced
#[derive(Debug, Clone)]
pub struct VerificationReport {
    /// Every captured point, in capture order
    pub points: Vec<SweepPoint>,

    /// Per-device verdicts, in batch order
    pub certifications: Vec<(DeviceId, Certification)>,
}

pub struct VerificationEngine {
    ctx: Arc<Context>,
    in_progress: AtomicBool,
    active: AtomicBool,
}

impl VerificationEngine {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            in_progress: AtomicBool::new(false),
            active: AtomicBool::new(false),
        }
    }

    /// Request a cooperative stop; no certification is computed
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            info!("verification stop requested");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Run the full sweep and certify every device.
    ///
    /// # Errors
    ///
    /// [`Error::VerificationInProgress`] if a run is already active,
    /// [`Error::ReferenceControllerFailure`] when the controller cannot
    /// be driven, [`Error::Stopped`] on operator stop. The controller is
    /// commanded back to zero pressure regardless of outcome.
    pub async fn run(&self) -> Result<VerificationReport> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::VerificationInProgress);
        }
        self.active.store(true, Ordering::Release);

        let ctx = &self.ctx;
        let devices = ctx.registry.operational_ids();
        ctx.events.emit(Event::VerificationStarted {
            devices: devices.len(),
        });
        info!(devices = devices.len(), "verification sweep started");

        for id in &devices {
            ctx.set_status(id, DeviceStatus::Verifying);
            ctx.set_stage(id, "verification sweep");
        }

        let swept = if devices.is_empty() {
            Err(Error::NoDevicesRemaining)
        } else {
            self.sweep(&devices).await
        };

        // Terminal safety action: vent back to zero whatever happened
        if let Err(e) = ctx.reference.set_pressure(0.0).await {
            warn!(error = %e, "failed to return reference controller to zero");
        }

        let outcome = match swept {
            Ok(points) => Ok(self.certify(&devices, points)),
            Err(e) => {
                for id in &devices {
                    if ctx.registry.status(id) == Some(DeviceStatus::Verifying) {
                        ctx.set_status(id, DeviceStatus::Ready);
                        ctx.set_stage(id, "verification stopped");
                    }
                }
                ctx.events.emit(Event::VerificationStopped {
                    reason: e.to_string(),
                });
                Err(e)
            }
        };

        self.active.store(false, Ordering::Release);
        self.in_progress.store(false, Ordering::Release);
        outcome
    }

    async fn sweep(&self, devices: &[DeviceId]) -> Result<Vec<SweepPoint>> {
        let ctx = &self.ctx;
        let ladder = sweep_ladder(ctx.config.sweep_pressure);
        let mut points = Vec::new();

        self.drive_reference_prerequisites().await?;

        for (rung, target) in ladder.iter().enumerate() {
            if !self.active.load(Ordering::Acquire) {
                return Err(Error::Stopped);
            }

            info!(rung, target, "stepping reference controller");
            self.drive_reference(*target).await?;
            sleep(ctx.config.stabilization_delay).await;

            for id in devices {
                if !ctx.registry.contains(id) {
                    continue;
                }
                if !ctx.device_connected(id) {
                    warn!(device = %id, "skipping reading, link down");
                    continue;
                }

                // Verification trusts the live stream; no fresh read
                match ctx.registry.latest_sample(id) {
                    Some(sample) => {
                        let point = SweepPoint::new(id.clone(), *target, sample.value);
                        ctx.events.emit(Event::VerificationReading {
                            point: point.clone(),
                        });
                        points.push(point);
                    }
                    None => warn!(device = %id, "no streamed sample to record"),
                }
            }
        }

        Ok(points)
    }

    fn certify(&self, devices: &[DeviceId], points: Vec<SweepPoint>) -> VerificationReport {
        let ctx = &self.ctx;
        let mut certifications = Vec::new();
        let mut certified_count = 0;

        for id in devices {
            let Some(snapshot) = ctx.registry.snapshot(id) else {
                continue;
            };

            let device_points: Vec<SweepPoint> =
                points.iter().filter(|p| p.device == *id).cloned().collect();
            let certification = Certification::from_points(&device_points, ctx.config.tolerance);

            info!(device = %id, %certification, "verification verdict");
            if certification.certified {
                certified_count += 1;
            }

            if snapshot.status == DeviceStatus::Verifying {
                ctx.set_status(id, DeviceStatus::Ready);
                ctx.set_stage(
                    id,
                    if certification.certified {
                        "certified"
                    } else {
                        "certification failed"
                    },
                );
            }

            ctx.events.emit(Event::DeviceCertified {
                device: id.clone(),
                certification: certification.clone(),
            });
            certifications.push((id.clone(), certification));
        }

        ctx.events.emit(Event::VerificationCompleted {
            certified: certified_count,
            rejected: certifications.len() - certified_count,
        });

        VerificationReport {
            points,
            certifications,
        }
    }

    async fn drive_reference_prerequisites(&self) -> Result<()> {
        self.ctx
            .reference
            .ensure_prerequisites()
            .await
            .map_err(|e| {
                self.active.store(false, Ordering::Release);
                Error::ReferenceControllerFailure(e.to_string())
            })
    }

    async fn drive_reference(&self, target: f32) -> Result<()> {
        let ctx = &self.ctx;
        let result = async {
            ctx.reference.set_pressure(target).await?;
            ctx.reference.wait_until_at_target().await
        }
        .await;

        result.map_err(|e| {
            self.active.store(false, Ordering::Release);
            Error::ReferenceControllerFailure(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_shape() {
        let ladder = sweep_ladder(200.0);
        assert_eq!(
            ladder,
            vec![0.0, 50.0, 100.0, 150.0, 200.0, 150.0, 100.0, 50.0, 0.0]
        );
    }

    #[test]
    fn test_ladder_is_symmetric() {
        let ladder = sweep_ladder(250.0);
        let mut reversed = ladder.clone();
        reversed.reverse();
        assert_eq!(ladder, reversed);
    }
}
