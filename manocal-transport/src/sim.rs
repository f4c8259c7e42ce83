//! In-memory simulated transport and reference controller
//!
//! Behaves like a bench full of transmitters: per-device failure scripting
//! (refused connects, dead discovery, dropped links mid-run, garbled
//! responses) on top of a faithful command responder that decodes each
//! written packet with `manocal-core` and answers in kind. Used by the
//! engine's integration tests and the runnable examples.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use manocal_core::{Command, Packet};
use manocal_types::DeviceId;

use crate::{
    error::{Error, Result},
    DeviceLink, Endpoint, EndpointSet, LinkHandle, NotificationStream, ReferenceController,
};

/// Command/response channel
pub const SIM_COMMAND_ENDPOINT: Endpoint = Endpoint(0x0010);

/// Streaming pressure channel
pub const SIM_STREAM_ENDPOINT: Endpoint = Endpoint(0x0011);

/// Metadata channels
pub const SIM_FIRMWARE_ENDPOINT: Endpoint = Endpoint(0x0021);
pub const SIM_NAME_ENDPOINT: Endpoint = Endpoint(0x0022);
pub const SIM_SERIAL_ENDPOINT: Endpoint = Endpoint(0x0023);
pub const SIM_MODEL_ENDPOINT: Endpoint = Endpoint(0x0024);

const STREAM_BUFFER: usize = 64;

/// Scripted behaviour for one simulated transmitter
#[derive(Debug, Clone)]
pub struct SimProfile {
    pub display_name: String,
    pub firmware_version: String,
    pub serial_number: String,
    pub model_number: String,

    /// Zero offset the device reports (and re-zeroes to) on READ_ZERO_OFFSET
    pub zero_offset: i32,

    /// Fail this many connect attempts before accepting one
    pub connect_failures: u32,

    /// Endpoint discovery never completes
    pub fail_discovery: bool,

    /// Fail this many command writes before behaving
    pub command_failures: u32,

    /// Answer this many commands with a response for the wrong command id
    pub garbled_responses: u32,

    /// Drop the link once this many command exchanges have completed
    pub drop_after_writes: Option<usize>,

    /// Expose no metadata endpoints at all
    pub omit_metadata: bool,

    /// Metadata endpoints exist but reads time out
    pub fail_metadata_reads: bool,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            display_name: "PT".to_owned(),
            firmware_version: "2.1.0".to_owned(),
            serial_number: "000000".to_owned(),
            model_number: "PTX-510".to_owned(),
            zero_offset: 0,
            connect_failures: 0,
            fail_discovery: false,
            command_failures: 0,
            garbled_responses: 0,
            drop_after_writes: None,
            omit_metadata: false,
            fail_metadata_reads: false,
        }
    }
}

#[derive(Debug)]
struct SimDevice {
    profile: SimProfile,
    connected: bool,
    handle: Option<LinkHandle>,
    pending_response: Option<Bytes>,
    stream_tx: Option<mpsc::Sender<Bytes>>,
    connect_attempts: usize,
    command_writes: usize,
    written: Vec<Command>,
    lower_cal: Option<i32>,
    upper_cal: Option<i32>,
}

impl SimDevice {
    fn new(profile: SimProfile) -> Self {
        Self {
            profile,
            connected: false,
            handle: None,
            pending_response: None,
            stream_tx: None,
            connect_attempts: 0,
            command_writes: 0,
            written: Vec::new(),
            lower_cal: None,
            upper_cal: None,
        }
    }

    fn sever(&mut self) {
        self.connected = false;
        self.pending_response = None;
        // Dropping the sender closes the notification stream
        self.stream_tx = None;
    }

    fn respond_to(&mut self, request: &Packet) -> Packet {
        match request.command {
            Command::ReadDeviceName => Packet::with_payload(
                Command::ReadDeviceName,
                Bytes::copy_from_slice(self.profile.display_name.as_bytes()),
            ),
            Command::WriteDeviceName => {
                self.profile.display_name = request.text();
                Packet::with_payload(
                    Command::WriteDeviceName,
                    Bytes::copy_from_slice(self.profile.display_name.as_bytes()),
                )
            }
            Command::ReadZeroOffset => {
                Packet::with_value(Command::ReadZeroOffset, self.profile.zero_offset)
            }
            Command::WriteLowerCal => {
                self.lower_cal = Some(request.value());
                Packet::with_value(Command::WriteLowerCal, request.value())
            }
            Command::ReadLowerCal => {
                Packet::with_value(Command::ReadLowerCal, self.lower_cal.unwrap_or(0))
            }
            Command::WriteUpperCal => {
                self.upper_cal = Some(request.value());
                Packet::with_value(Command::WriteUpperCal, request.value())
            }
            Command::ReadUpperCal => {
                Packet::with_value(Command::ReadUpperCal, self.upper_cal.unwrap_or(0))
            }
            Command::SoftReset => Packet::new(Command::SoftReset),
        }
    }
}

#[derive(Default)]
struct SimState {
    devices: HashMap<DeviceId, SimDevice>,
    handles: HashMap<LinkHandle, DeviceId>,
    next_handle: u64,
}

/// Simulated wireless transport
#[derive(Default)]
pub struct SimLink {
    state: Mutex<SimState>,
}

impl SimLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a simulated device
    pub fn add_device(&self, id: impl Into<DeviceId>, profile: SimProfile) {
        let mut state = self.state.lock();
        state.devices.insert(id.into(), SimDevice::new(profile));
    }

    /// Push a pressure sample onto a device's notification stream
    pub fn push_sample(&self, id: &DeviceId, value: f32) {
        let mut state = self.state.lock();
        if let Some(device) = state.devices.get_mut(id) {
            if let Some(tx) = &device.stream_tx {
                // A full buffer just drops the sample, like a lossy radio
                let _ = tx.try_send(Bytes::copy_from_slice(&value.to_le_bytes()));
            }
        }
    }

    /// Push a raw notification payload (malformed samples included)
    pub fn push_raw_notification(&self, id: &DeviceId, payload: &[u8]) {
        let mut state = self.state.lock();
        if let Some(device) = state.devices.get_mut(id) {
            if let Some(tx) = &device.stream_tx {
                let _ = tx.try_send(Bytes::copy_from_slice(payload));
            }
        }
    }

    /// Kill a device's link out from under the engine
    pub fn sever(&self, id: &DeviceId) {
        let mut state = self.state.lock();
        if let Some(device) = state.devices.get_mut(id) {
            device.sever();
        }
    }

    /// Commands the device has received, in order
    pub fn written_commands(&self, id: &DeviceId) -> Vec<Command> {
        let state = self.state.lock();
        state
            .devices
            .get(id)
            .map(|d| d.written.clone())
            .unwrap_or_default()
    }

    /// Stored upper calibration point, if any was written
    pub fn upper_cal(&self, id: &DeviceId) -> Option<i32> {
        self.state.lock().devices.get(id).and_then(|d| d.upper_cal)
    }

    /// Stored lower calibration point, if any was written
    pub fn lower_cal(&self, id: &DeviceId) -> Option<i32> {
        self.state.lock().devices.get(id).and_then(|d| d.lower_cal)
    }

    /// How many times `connect` has been called for the device
    pub fn connect_attempts(&self, id: &DeviceId) -> usize {
        self.state
            .lock()
            .devices
            .get(id)
            .map(|d| d.connect_attempts)
            .unwrap_or(0)
    }

    /// Whether a subscription is currently installed on the device
    pub fn is_subscribed(&self, id: &DeviceId) -> bool {
        self.state
            .lock()
            .devices
            .get(id)
            .is_some_and(|d| d.stream_tx.is_some())
    }

    fn resolve(state: &SimState, handle: LinkHandle) -> Result<DeviceId> {
        state
            .handles
            .get(&handle)
            .cloned()
            .ok_or(Error::StaleHandle(handle))
    }
}

#[async_trait]
impl DeviceLink for SimLink {
    async fn connect(&self, id: &DeviceId, timeout: Duration) -> Result<LinkHandle> {
        let mut state = self.state.lock();

        let device = state
            .devices
            .get_mut(id)
            .ok_or_else(|| Error::UnknownDevice(id.to_string()))?;

        device.connect_attempts += 1;

        if device.profile.connect_failures > 0 {
            device.profile.connect_failures -= 1;
            return Err(Error::ConnectionTimeout(timeout));
        }

        // Idempotent: an open link is simply handed back
        if device.connected {
            if let Some(handle) = device.handle {
                return Ok(handle);
            }
        }

        state.next_handle += 1;
        let handle = LinkHandle(state.next_handle);

        if let Some(device) = state.devices.get_mut(id) {
            device.connected = true;
            device.handle = Some(handle);
        }
        state.handles.insert(handle, id.clone());

        debug!(device = %id, %handle, "sim link connected");
        Ok(handle)
    }

    async fn disconnect(&self, handle: LinkHandle) -> Result<()> {
        let mut state = self.state.lock();
        let id = Self::resolve(&state, handle)?;
        if let Some(device) = state.devices.get_mut(&id) {
            device.sever();
        }
        Ok(())
    }

    fn is_connected(&self, handle: LinkHandle) -> bool {
        let state = self.state.lock();
        state
            .handles
            .get(&handle)
            .and_then(|id| state.devices.get(id))
            .is_some_and(|d| d.connected)
    }

    async fn discover(&self, handle: LinkHandle, timeout: Duration) -> Result<EndpointSet> {
        let mut state = self.state.lock();
        let id = Self::resolve(&state, handle)?;
        let device = state.devices.get_mut(&id).ok_or(Error::StaleHandle(handle))?;

        if !device.connected {
            return Err(Error::Disconnected);
        }
        if device.profile.fail_discovery {
            return Err(Error::DiscoveryTimeout(timeout));
        }

        let metadata = !device.profile.omit_metadata;
        Ok(EndpointSet {
            command: SIM_COMMAND_ENDPOINT,
            stream: SIM_STREAM_ENDPOINT,
            firmware_version: metadata.then_some(SIM_FIRMWARE_ENDPOINT),
            display_name: metadata.then_some(SIM_NAME_ENDPOINT),
            serial_number: metadata.then_some(SIM_SERIAL_ENDPOINT),
            model_number: metadata.then_some(SIM_MODEL_ENDPOINT),
        })
    }

    async fn read(
        &self,
        handle: LinkHandle,
        endpoint: Endpoint,
        timeout: Duration,
    ) -> Result<Bytes> {
        let mut state = self.state.lock();
        let id = Self::resolve(&state, handle)?;
        let device = state.devices.get_mut(&id).ok_or(Error::StaleHandle(handle))?;

        if !device.connected {
            return Err(Error::Disconnected);
        }

        match endpoint {
            SIM_COMMAND_ENDPOINT => device
                .pending_response
                .take()
                .ok_or(Error::ReadTimeout(timeout)),
            SIM_FIRMWARE_ENDPOINT | SIM_NAME_ENDPOINT | SIM_SERIAL_ENDPOINT
            | SIM_MODEL_ENDPOINT => {
                if device.profile.fail_metadata_reads {
                    return Err(Error::ReadTimeout(timeout));
                }
                let text = match endpoint {
                    SIM_FIRMWARE_ENDPOINT => &device.profile.firmware_version,
                    SIM_NAME_ENDPOINT => &device.profile.display_name,
                    SIM_SERIAL_ENDPOINT => &device.profile.serial_number,
                    _ => &device.profile.model_number,
                };
                Ok(Bytes::copy_from_slice(text.as_bytes()))
            }
            other => Err(Error::EndpointNotFound(other)),
        }
    }

    async fn write(
        &self,
        handle: LinkHandle,
        endpoint: Endpoint,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let id = Self::resolve(&state, handle)?;
        let device = state.devices.get_mut(&id).ok_or(Error::StaleHandle(handle))?;

        if !device.connected {
            return Err(Error::Disconnected);
        }
        if endpoint != SIM_COMMAND_ENDPOINT {
            return Err(Error::EndpointNotFound(endpoint));
        }

        if let Some(limit) = device.profile.drop_after_writes {
            if device.command_writes >= limit {
                debug!(device = %id, "sim link dropping mid-command");
                device.sever();
                return Err(Error::Disconnected);
            }
        }

        if device.profile.command_failures > 0 {
            device.profile.command_failures -= 1;
            return Err(Error::WriteTimeout(timeout));
        }

        let request = match Packet::decode(payload) {
            Ok(packet) => packet,
            Err(e) => {
                // An unintelligible request gets no response at all
                trace!(device = %id, error = %e, "sim dropping malformed request");
                return Ok(());
            }
        };

        device.written.push(request.command);
        device.command_writes += 1;

        let response = if device.profile.garbled_responses > 0 {
            device.profile.garbled_responses -= 1;
            // Answer for a command nobody asked about
            Packet::new(Command::SoftReset)
        } else {
            device.respond_to(&request)
        };

        device.pending_response = Some(response.encode()?.freeze());
        Ok(())
    }

    async fn subscribe(
        &self,
        handle: LinkHandle,
        endpoint: Endpoint,
        _timeout: Duration,
    ) -> Result<NotificationStream> {
        let mut state = self.state.lock();
        let id = Self::resolve(&state, handle)?;
        let device = state.devices.get_mut(&id).ok_or(Error::StaleHandle(handle))?;

        if !device.connected {
            return Err(Error::Disconnected);
        }
        if endpoint != SIM_STREAM_ENDPOINT {
            return Err(Error::EndpointNotFound(endpoint));
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        device.stream_tx = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, handle: LinkHandle, endpoint: Endpoint) -> Result<()> {
        let mut state = self.state.lock();
        let id = Self::resolve(&state, handle)?;
        let device = state.devices.get_mut(&id).ok_or(Error::StaleHandle(handle))?;

        if endpoint == SIM_STREAM_ENDPOINT {
            device.stream_tx = None;
        }
        Ok(())
    }
}

impl From<manocal_core::Error> for Error {
    fn from(e: manocal_core::Error) -> Self {
        Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[derive(Debug, Default)]
struct RefState {
    targets: Vec<f32>,
    at_target_count: usize,
    fail_set_at: Option<usize>,
    fail_wait: bool,
    fail_prerequisites: bool,
}

/// Simulated reference pressure controller
#[derive(Debug, Default)]
pub struct SimReference {
    state: Mutex<RefState>,
}

impl SimReference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the nth `set_pressure` call (0-based)
    pub fn fail_set_pressure_at(&self, nth: usize) {
        self.state.lock().fail_set_at = Some(nth);
    }

    /// Fail every `wait_until_at_target` call
    pub fn fail_wait(&self) {
        self.state.lock().fail_wait = true;
    }

    /// Fail the prerequisite check
    pub fn fail_prerequisites(&self) {
        self.state.lock().fail_prerequisites = true;
    }

    /// Every pressure commanded so far, in order
    pub fn targets(&self) -> Vec<f32> {
        self.state.lock().targets.clone()
    }

    /// How many times the controller reported "at target"
    pub fn at_target_count(&self) -> usize {
        self.state.lock().at_target_count
    }
}

#[async_trait]
impl ReferenceController for SimReference {
    async fn ensure_prerequisites(&self) -> Result<()> {
        let state = self.state.lock();
        if state.fail_prerequisites {
            return Err(Error::ReferenceController(
                "controller not in control mode".to_owned(),
            ));
        }
        Ok(())
    }

    async fn set_pressure(&self, value: f32) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_set_at == Some(state.targets.len()) {
            // One-shot: models a transient comm failure, so a later
            // safety vent can still get through
            state.fail_set_at = None;
            return Err(Error::ReferenceController(
                "no response to pressure set command".to_owned(),
            ));
        }
        state.targets.push(value);
        Ok(())
    }

    async fn wait_until_at_target(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_wait {
            return Err(Error::ReferenceController(
                "target pressure never reached".to_owned(),
            ));
        }
        state.at_target_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use manocal_core::CalResponse;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let link = SimLink::new();
        let id = DeviceId::from("PT-1");
        link.add_device(id.clone(), SimProfile::default());

        let first = link.connect(&id, TIMEOUT).await.unwrap();
        let second = link.connect(&id, TIMEOUT).await.unwrap();
        assert_eq!(first, second);
        assert!(link.is_connected(first));
    }

    #[tokio::test]
    async fn test_command_echo() {
        let link = SimLink::new();
        let id = DeviceId::from("PT-1");
        link.add_device(id.clone(), SimProfile::default());

        let handle = link.connect(&id, TIMEOUT).await.unwrap();
        let endpoints = link.discover(handle, TIMEOUT).await.unwrap();

        let frame = manocal_core::CalRequest::WriteUpperCal(250).encode().unwrap();
        link.write(handle, endpoints.command, &frame, TIMEOUT)
            .await
            .unwrap();
        let raw = link.read(handle, endpoints.command, TIMEOUT).await.unwrap();

        let response = CalResponse::decode(Command::WriteUpperCal, &raw).unwrap();
        assert_eq!(response, CalResponse::RawValue(250));
        assert_eq!(link.upper_cal(&id), Some(250));
    }

    #[tokio::test]
    async fn test_severed_link_reports_disconnected() {
        let link = SimLink::new();
        let id = DeviceId::from("PT-1");
        link.add_device(id.clone(), SimProfile::default());

        let handle = link.connect(&id, TIMEOUT).await.unwrap();
        link.sever(&id);

        assert!(!link.is_connected(handle));
        let result = link.discover(handle, TIMEOUT).await;
        assert!(matches!(result, Err(Error::Disconnected)));
    }

    #[tokio::test]
    async fn test_stream_closes_on_sever() {
        let link = SimLink::new();
        let id = DeviceId::from("PT-1");
        link.add_device(id.clone(), SimProfile::default());

        let handle = link.connect(&id, TIMEOUT).await.unwrap();
        let endpoints = link.discover(handle, TIMEOUT).await.unwrap();
        let mut stream = link
            .subscribe(handle, endpoints.stream, TIMEOUT)
            .await
            .unwrap();

        link.push_sample(&id, 101.5);
        let payload = stream.recv().await.unwrap();
        assert_eq!(manocal_core::decode_sample(&payload).unwrap(), 101.5);

        link.sever(&id);
        assert!(stream.recv().await.is_none());
    }
}
