//! # manocal
//!
//! Batch calibration and verification engine for wireless pressure
//! transmitters.
//!
//! ## Features
//!
//! - Sequential per-device setup with bounded retries
//! - Three-point calibration (zero / low / high) with per-device failure
//!   isolation
//! - Verification sweep against a wired reference controller with
//!   pass/fail certification
//! - Connectivity watchdog that reclassifies silently-dropped devices
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use manocal::{CalibrationRig, Config, DeviceSeed, NullSink};
//! use manocal_transport::{SimLink, SimProfile, SimReference};
//!
//! #[tokio::main]
//! async fn main() -> manocal::Result<()> {
//!     let link = Arc::new(SimLink::new());
//!     link.add_device("PT-1", SimProfile::default());
//!
//!     let rig = CalibrationRig::new(
//!         link,
//!         Arc::new(SimReference::new()),
//!         Arc::new(NullSink),
//!         Config::default(),
//!     );
//!
//!     rig.register_batch(vec![DeviceSeed::new("PT-1")]);
//!     rig.monitor().start();
//!
//!     rig.setup().run().await?;
//!     let summary = rig.calibration().run().await?;
//!     println!("calibrated {} devices", summary.calibrated.len());
//!
//!     let report = rig.verification().run().await?;
//!     for (device, certification) in &report.certifications {
//!         println!("{device}: {certification}");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod calibration;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod monitor;
pub mod registry;
pub mod rig;
pub mod setup;
pub mod verification;

// Re-exports
pub use calibration::{CalibrationSequencer, CalibrationSummary, Phase};
pub use config::Config;
pub use context::Context;
pub use error::{Error, Result};
pub use event::{ChannelSink, Event, EventSink, NullSink};
pub use monitor::ConnectivityMonitor;
pub use registry::{DeviceSeed, DeviceSnapshot, Registry};
pub use rig::CalibrationRig;
pub use setup::SetupOrchestrator;
pub use verification::{sweep_ladder, VerificationEngine, VerificationReport};

// Re-export shared types
pub use manocal_types::{
    Certification, DeviceId, DeviceMetadata, DeviceStatus, LinkHealth, PressureSample, SweepPoint,
};
