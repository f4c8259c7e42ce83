//! Top-level composition of the engine
//!
//! Builds the shared context once and hands it to every component. This
//! is the only place the pieces meet; nothing holds a back-reference
//! into anything else.

use std::sync::Arc;

use manocal_transport::{DeviceLink, ReferenceController};
use manocal_types::DeviceId;

use crate::{
    calibration::CalibrationSequencer,
    config::Config,
    context::Context,
    error::{Error, Result},
    event::EventSink,
    monitor::ConnectivityMonitor,
    registry::{DeviceSeed, Registry},
    setup::SetupOrchestrator,
    verification::VerificationEngine,
};

pub struct CalibrationRig {
    ctx: Arc<Context>,
    setup: SetupOrchestrator,
    monitor: ConnectivityMonitor,
    calibration: CalibrationSequencer,
    verification: VerificationEngine,
}

impl CalibrationRig {
    pub fn new(
        link: Arc<dyn DeviceLink>,
        reference: Arc<dyn ReferenceController>,
        events: Arc<dyn EventSink>,
        config: Config,
    ) -> Self {
        let ctx = Context::new(link, reference, events, config);
        Self {
            setup: SetupOrchestrator::new(ctx.clone()),
            monitor: ConnectivityMonitor::new(ctx.clone()),
            calibration: CalibrationSequencer::new(ctx.clone()),
            verification: VerificationEngine::new(ctx.clone()),
            ctx,
        }
    }

    /// Hand the rig a fresh batch of devices to manage
    pub fn register_batch(&self, seeds: Vec<DeviceSeed>) {
        self.ctx.registry.register_batch(seeds);
    }

    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn setup(&self) -> &SetupOrchestrator {
        &self.setup
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn calibration(&self) -> &CalibrationSequencer {
        &self.calibration
    }

    pub fn verification(&self) -> &VerificationEngine {
        &self.verification
    }

    /// Forcibly remove a device from the batch.
    ///
    /// Pauses a running setup sequence for the duration of the removal so
    /// the two never race, then resumes it from the next unresolved queue
    /// position.
    pub async fn disconnect_device(&self, id: &DeviceId) -> Result<()> {
        if !self.ctx.registry.contains(id) {
            return Err(Error::UnknownDevice(id.clone()));
        }

        let handle = self.ctx.registry.handle(id);
        let was_running = self.setup.is_running();
        if was_running {
            self.setup.pause();
        }

        self.ctx.remove_device(id, "manual disconnect").await;
        if let Some(handle) = handle {
            if let Err(e) = self.ctx.link.disconnect(handle).await {
                tracing::debug!(device = %id, error = %e, "link close failed during disconnect");
            }
        }

        if was_running {
            self.setup.resume();
        }
        Ok(())
    }

    /// Stop any active calibration or verification run
    pub fn stop_all(&self) {
        self.calibration.stop();
        self.verification.stop();
    }
}
