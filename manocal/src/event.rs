//! Outbound notifications to UI and reporting collaborators
//!
//! These are out-of-band: nothing in the engine's control flow depends on
//! whether anyone listens. Components call [`EventSink::emit`] at every
//! externally-interesting transition; composition decides where the events
//! go.

use std::sync::Arc;

use tokio::sync::mpsc;

use manocal_types::{Certification, DeviceId, DeviceStatus, SweepPoint};

/// Everything the engine reports outward
#[derive(Debug, Clone)]
pub enum Event {
    DeviceStatusChanged {
        device: DeviceId,
        from: DeviceStatus,
        to: DeviceStatus,
    },
    SetupStageChanged {
        device: DeviceId,
        stage: String,
    },
    SetupRetry {
        device: DeviceId,
        attempt: u32,
        cause: String,
    },
    SetupFailed {
        device: DeviceId,
        cause: String,
    },
    SetupCompleted {
        device: DeviceId,
    },
    DeviceRemoved {
        device: DeviceId,
        reason: String,
    },
    ConnectivityLost {
        device: DeviceId,
    },
    BatchReadyChanged {
        ready: bool,
    },
    CalibrationStarted {
        devices: usize,
    },
    /// Consolidated per-phase report of devices excised from the batch
    DevicesDropped {
        phase: &'static str,
        dropped: Vec<(DeviceId, String)>,
    },
    CalibrationStopped {
        reason: String,
    },
    CalibrationCompleted {
        calibrated: Vec<DeviceId>,
    },
    VerificationStarted {
        devices: usize,
    },
    VerificationReading {
        point: SweepPoint,
    },
    DeviceCertified {
        device: DeviceId,
        certification: Certification,
    },
    VerificationStopped {
        reason: String,
    },
    VerificationCompleted {
        certified: usize,
        rejected: usize,
    },
}

/// Observer interface for engine events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Sink that drops everything
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

/// Sink that forwards events over an unbounded channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    /// Create a sink and the receiver to drain it
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: Event) {
        // Receiver gone means nobody is listening anymore; that is fine
        let _ = self.tx.send(event);
    }
}
