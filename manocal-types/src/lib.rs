//! Type definitions for manocal

pub mod certification;
pub mod device;
pub mod reading;

pub use certification::{Certification, SweepPoint};
pub use device::{DeviceId, DeviceMetadata, DeviceStatus, LinkHealth};
pub use reading::PressureSample;
