//! Transport layer interfaces for manocal
//!
//! The engine never owns a radio or a serial line. It talks to two narrow
//! collaborators defined here:
//!
//! - [`DeviceLink`]: the wireless transport to a pressure transmitter
//!   (connect, endpoint discovery, read/write, streaming subscription)
//! - [`ReferenceController`]: the wired precision pressure source used as
//!   ground truth
//!
//! Real implementations (BLE stack, serial instrument protocol) live
//! outside this workspace; [`sim`] provides in-memory implementations for
//! tests and examples.

pub mod error;
pub mod sim;

pub use error::{Error, Result};
pub use sim::{SimLink, SimProfile, SimReference};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use manocal_types::DeviceId;

/// Opaque token for an open wireless link.
///
/// Issued and owned by the transport; the engine only stores and passes it
/// back. A handle goes stale when the transport drops the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkHandle(pub u64);

impl fmt::Display for LinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Opaque handle to an addressable command or data channel on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint(pub u16);

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Endpoints resolved by discovery.
///
/// `command` and `stream` are mandatory; a device missing either is not
/// usable and discovery reports [`Error::EndpointNotFound`]. The metadata
/// endpoints are optional extras.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSet {
    /// Command/response channel (20-byte packets)
    pub command: Endpoint,

    /// Streaming pressure channel (4-byte samples)
    pub stream: Endpoint,

    pub firmware_version: Option<Endpoint>,
    pub display_name: Option<Endpoint>,
    pub serial_number: Option<Endpoint>,
    pub model_number: Option<Endpoint>,
}

/// Stream of raw notification payloads from a subscribed endpoint.
///
/// The channel closes when the subscription is torn down or the link
/// drops.
pub type NotificationStream = mpsc::Receiver<Bytes>;

/// Wireless transport to a device
///
/// All waits are bounded by the caller-supplied timeout and surface as the
/// corresponding timeout error rather than hanging.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Open a link to the device, or return the existing one.
    ///
    /// Idempotent: connecting to an already-connected device is success,
    /// not an error.
    async fn connect(&self, id: &DeviceId, timeout: Duration) -> Result<LinkHandle>;

    /// Close the link
    async fn disconnect(&self, handle: LinkHandle) -> Result<()>;

    /// Check link state without touching the radio
    fn is_connected(&self, handle: LinkHandle) -> bool;

    /// Resolve the device's endpoints
    async fn discover(&self, handle: LinkHandle, timeout: Duration) -> Result<EndpointSet>;

    /// Read the current value of an endpoint
    async fn read(&self, handle: LinkHandle, endpoint: Endpoint, timeout: Duration)
        -> Result<Bytes>;

    /// Write a payload to an endpoint and wait for the link-level ack
    async fn write(
        &self,
        handle: LinkHandle,
        endpoint: Endpoint,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<()>;

    /// Subscribe to an endpoint's notifications
    async fn subscribe(
        &self,
        handle: LinkHandle,
        endpoint: Endpoint,
        timeout: Duration,
    ) -> Result<NotificationStream>;

    /// Tear down a subscription
    async fn unsubscribe(&self, handle: LinkHandle, endpoint: Endpoint) -> Result<()>;
}

/// The wired precision pressure source.
///
/// Wraps a line-oriented instrument protocol; any failure here is treated
/// as fatal to a whole calibration or verification run.
#[async_trait]
pub trait ReferenceController: Send + Sync {
    /// Verify output mode and vent state before driving pressure
    async fn ensure_prerequisites(&self) -> Result<()>;

    /// Command the controller to a target pressure
    async fn set_pressure(&self, value: f32) -> Result<()>;

    /// Block until the controller reports holding the commanded target
    async fn wait_until_at_target(&self) -> Result<()>;
}
