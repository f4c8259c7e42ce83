//! Three-point calibration sequencing
//!
//! Drives Zero → Low → High across every operational device. Failures are
//! isolated: a device that cannot take a point is excised from the batch
//! and the run continues. The one exception is the reference controller:
//! if it cannot be driven to the sweep pressure, the whole run aborts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use manocal_core::CalRequest;
use manocal_types::{DeviceId, DeviceStatus};

use crate::{
    context::Context,
    error::{Error, Result},
    event::Event,
    registry::DeviceSnapshot,
};

/// One calibration phase, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Re-zero against ambient and read the offset back
    Zero,

    /// Store the lower point at reference pressure zero
    Low,

    /// Store the upper point at the shared sweep pressure
    High,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Zero, Phase::Low, Phase::High];

    pub fn name(self) -> &'static str {
        match self {
            Self::Zero => "zero",
            Self::Low => "low",
            Self::High => "high",
        }
    }

    fn request(self, sweep_pressure: f32) -> CalRequest {
        match self {
            Self::Zero => CalRequest::ReadZeroOffset,
            Self::Low => CalRequest::WriteLowerCal(0),
            Self::High => CalRequest::WriteUpperCal(sweep_pressure as i32),
        }
    }
}

/// Outcome of a completed calibration run
#[derive(Debug, Clone)]
pub struct CalibrationSummary {
    /// Devices that took all three points, in batch order
    pub calibrated: Vec<DeviceId>,

    /// Devices excised along the way
    pub dropped: usize,
}

pub struct CalibrationSequencer {
    ctx: Arc<Context>,
    in_progress: AtomicBool,
    active: AtomicBool,
}

impl CalibrationSequencer {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            in_progress: AtomicBool::new(false),
            active: AtomicBool::new(false),
        }
    }

    /// Request a cooperative stop. The current command finishes; no
    /// further device or phase is started.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            info!("calibration stop requested");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Run the full three-phase sequence over all operational devices.
    ///
    /// # Errors
    ///
    /// [`Error::CalibrationInProgress`] if a run is already active,
    /// [`Error::ReferenceControllerFailure`] on the one fatal failure
    /// class, [`Error::NoDevicesRemaining`] when a phase empties the
    /// batch, [`Error::Stopped`] on operator stop. Any error path leaves
    /// every surviving device in the reviewable failed state.
    pub async fn run(&self) -> Result<CalibrationSummary> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::CalibrationInProgress);
        }
        self.active.store(true, Ordering::Release);

        let devices = self.ctx.registry.operational_ids();
        self.ctx.events.emit(Event::CalibrationStarted {
            devices: devices.len(),
        });
        info!(devices = devices.len(), "calibration run started");

        let outcome = self.run_phases().await;

        match &outcome {
            Ok(summary) => {
                info!(
                    calibrated = summary.calibrated.len(),
                    dropped = summary.dropped,
                    "calibration run completed"
                );
                self.ctx.events.emit(Event::CalibrationCompleted {
                    calibrated: summary.calibrated.clone(),
                });
            }
            Err(e) => {
                warn!(error = %e, "calibration run ended early");
                self.reset_survivors();
                self.ctx.events.emit(Event::CalibrationStopped {
                    reason: e.to_string(),
                });
            }
        }

        self.active.store(false, Ordering::Release);
        self.in_progress.store(false, Ordering::Release);
        outcome
    }

    async fn run_phases(&self) -> Result<CalibrationSummary> {
        let ctx = &self.ctx;

        if ctx.registry.operational_ids().is_empty() {
            return Err(Error::NoDevicesRemaining);
        }

        let mut total_dropped = 0;

        for phase in Phase::ALL {
            if !self.active.load(Ordering::Acquire) {
                return Err(Error::Stopped);
            }

            // The high point needs the reference holding the sweep
            // pressure before any device is told to store it
            if phase == Phase::High {
                self.drive_reference_to_target().await?;
            }

            let dropped = self.run_phase(phase).await?;

            if !dropped.is_empty() {
                total_dropped += dropped.len();
                for (id, reason) in &dropped {
                    ctx.remove_device(id, reason).await;
                }
                ctx.events.emit(Event::DevicesDropped {
                    phase: phase.name(),
                    dropped,
                });
            }

            if ctx.registry.operational_ids().is_empty() {
                self.active.store(false, Ordering::Release);
                return Err(Error::NoDevicesRemaining);
            }

            // Device-side flash writes settle between phases
            sleep(ctx.config.inter_phase_delay).await;
        }

        let calibrated = ctx.registry.operational_ids();
        for id in &calibrated {
            ctx.registry.mark_calibrated(id);
            ctx.set_status(id, DeviceStatus::Ready);
            ctx.set_stage(id, "calibrated");
        }

        Ok(CalibrationSummary {
            calibrated,
            dropped: total_dropped,
        })
    }

    /// Drive the reference controller to the shared sweep pressure.
    ///
    /// Failure here is fatal to the run: the active flag falls in the
    /// same breath as the abort, so nothing downstream issues another
    /// device command.
    async fn drive_reference_to_target(&self) -> Result<()> {
        let ctx = &self.ctx;
        let target = ctx.config.sweep_pressure;

        info!(target, "driving reference controller to sweep pressure");

        let result = async {
            ctx.reference.ensure_prerequisites().await?;
            ctx.reference.set_pressure(target).await?;
            ctx.reference.wait_until_at_target().await
        }
        .await;

        result.map_err(|e| {
            self.active.store(false, Ordering::Release);
            Error::ReferenceControllerFailure(e.to_string())
        })
    }

    /// Apply one phase to every operational device, collecting the ones
    /// to drop
    async fn run_phase(&self, phase: Phase) -> Result<Vec<(DeviceId, String)>> {
        let ctx = &self.ctx;
        let mut dropped = Vec::new();

        info!(phase = phase.name(), "calibration phase started");

        for id in ctx.registry.operational_ids() {
            if !self.active.load(Ordering::Acquire) {
                return Err(Error::Stopped);
            }

            let Some(snapshot) = ctx.registry.snapshot(&id) else {
                continue;
            };

            // Status may have changed underneath us since the last
            // suspension point
            if !snapshot.status.is_operational() {
                continue;
            }
            if !ctx.device_connected(&id) {
                dropped.push((id, "link down at phase start".to_owned()));
                continue;
            }

            ctx.set_status(&id, DeviceStatus::Calibrating);
            ctx.set_stage(&id, format!("calibrating: {} point", phase.name()));

            match self.execute_with_retries(&snapshot, phase).await {
                Ok(()) => debug!(device = %id, phase = phase.name(), "point accepted"),
                Err(e) => {
                    warn!(device = %id, error = %e, "dropping device from batch");
                    dropped.push((id.clone(), e.to_string()));
                }
            }

            // Space commands out on the shared medium
            sleep(ctx.config.cal_inter_device_delay).await;
        }

        Ok(dropped)
    }

    async fn execute_with_retries(&self, snapshot: &DeviceSnapshot, phase: Phase) -> Result<()> {
        let ctx = &self.ctx;
        let client = ctx.client_for(snapshot)?;
        let request = phase.request(ctx.config.sweep_pressure);
        let mut last_cause = String::new();

        for attempt in 1..=ctx.config.command_retries {
            match client.execute(request.clone()).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_disconnect() => {
                    // Dead link: the remaining attempts cannot succeed
                    return Err(Error::DeviceDisconnected {
                        device: snapshot.id.clone(),
                    });
                }
                Err(e) => {
                    warn!(device = %snapshot.id, attempt, error = %e, "command attempt failed");
                    last_cause = e.to_string();
                }
            }
        }

        Err(Error::RetriesExhausted {
            device: snapshot.id.clone(),
            command: request.command().name(),
            attempts: ctx.config.command_retries,
            cause: last_cause,
        })
    }

    /// Leave nothing mid-transition after a stop or fatal abort
    fn reset_survivors(&self) {
        for id in self.ctx.registry.operational_ids() {
            self.ctx.set_status(&id, DeviceStatus::Failed);
            self.ctx.set_stage(&id, "calibration aborted");
        }
    }
}
