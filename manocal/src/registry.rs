//! In-memory catalogue of devices under management
//!
//! One shared, cheaply-cloneable handle (`Arc` inside) owns the device
//! table, the setup queue with its cursor, and the aggregate batch-ready
//! flag. Status transitions are recorded as append-only metadata: the
//! registry never validates transition legality, so an externally-forced
//! reset can always be reflected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use manocal_transport::{Endpoint, EndpointSet, LinkHandle};
use manocal_types::{DeviceId, DeviceMetadata, DeviceStatus, LinkHealth, PressureSample};

/// One entry of a batch handed to [`Registry::register_batch`]
#[derive(Debug, Clone)]
pub struct DeviceSeed {
    pub id: DeviceId,

    /// Link handle if the discovery layer already opened one
    pub handle: Option<LinkHandle>,
}

impl DeviceSeed {
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            handle: None,
        }
    }

    pub fn connected(id: impl Into<DeviceId>, handle: LinkHandle) -> Self {
        Self {
            id: id.into(),
            handle: Some(handle),
        }
    }
}

/// Streaming subscription bookkeeping: the subscribed endpoint and the
/// task pumping its notifications into the registry
#[derive(Debug)]
pub struct SubscriptionGuard {
    pub endpoint: Endpoint,
    pub pump: JoinHandle<()>,
}

#[derive(Debug)]
struct DeviceRecord {
    handle: Option<LinkHandle>,
    endpoints: Option<EndpointSet>,
    status: DeviceStatus,
    link_health: LinkHealth,
    stage: String,
    retry_count: u32,
    last_error: Option<String>,
    metadata: DeviceMetadata,
    latest_sample: Option<PressureSample>,
    calibrated: bool,
    subscription: Option<SubscriptionGuard>,
}

impl DeviceRecord {
    fn new(handle: Option<LinkHandle>) -> Self {
        Self {
            handle,
            endpoints: None,
            status: DeviceStatus::Pending,
            link_health: LinkHealth::Unknown,
            stage: String::new(),
            retry_count: 0,
            last_error: None,
            metadata: DeviceMetadata::default(),
            latest_sample: None,
            calibrated: false,
            subscription: None,
        }
    }
}

/// Point-in-time copy of a device record
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub handle: Option<LinkHandle>,
    pub endpoints: Option<EndpointSet>,
    pub status: DeviceStatus,
    pub link_health: LinkHealth,
    pub stage: String,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub metadata: DeviceMetadata,
    pub latest_sample: Option<PressureSample>,
    pub calibrated: bool,
}

/// A removed device, with what the caller needs to finish teardown
#[derive(Debug)]
pub struct RemovedDevice {
    pub snapshot: DeviceSnapshot,

    /// Endpoint still subscribed at removal time, for the async
    /// unsubscribe (the pump task is already aborted)
    pub stream_endpoint: Option<Endpoint>,
}

#[derive(Default)]
struct State {
    devices: HashMap<DeviceId, DeviceRecord>,
    queue: Vec<DeviceId>,
    cursor: usize,
}

struct Inner {
    state: RwLock<State>,
    batch_ready: AtomicBool,
}

/// Shared device registry
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                batch_ready: AtomicBool::new(false),
            }),
        }
    }

    /// Replace the whole collection with a fresh batch.
    ///
    /// Resets retry counters, the setup queue, and the cursor. Pump tasks
    /// of any previous batch are aborted.
    pub fn register_batch(&self, seeds: Vec<DeviceSeed>) {
        let mut state = self.inner.state.write();

        for record in state.devices.values_mut() {
            if let Some(guard) = record.subscription.take() {
                guard.pump.abort();
            }
        }

        state.queue = seeds.iter().map(|s| s.id.clone()).collect();
        state.cursor = 0;
        state.devices = seeds
            .into_iter()
            .map(|s| (s.id, DeviceRecord::new(s.handle)))
            .collect();

        self.inner.batch_ready.store(false, Ordering::Release);
        debug!(devices = state.queue.len(), "batch registered");
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.inner.state.read().devices.contains_key(id)
    }

    /// All device ids in batch order
    pub fn ids(&self) -> Vec<DeviceId> {
        self.inner.state.read().queue.clone()
    }

    /// Devices the calibration/verification engines may act on, in batch
    /// order
    pub fn operational_ids(&self) -> Vec<DeviceId> {
        let state = self.inner.state.read();
        state
            .queue
            .iter()
            .filter(|id| {
                state
                    .devices
                    .get(id)
                    .is_some_and(|d| d.status.is_operational())
            })
            .cloned()
            .collect()
    }

    pub fn snapshot(&self, id: &DeviceId) -> Option<DeviceSnapshot> {
        let state = self.inner.state.read();
        state.devices.get(id).map(|d| Self::snap(id, d))
    }

    /// Snapshots of every device, in batch order
    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let state = self.inner.state.read();
        state
            .queue
            .iter()
            .filter_map(|id| state.devices.get(id).map(|d| Self::snap(id, d)))
            .collect()
    }

    fn snap(id: &DeviceId, record: &DeviceRecord) -> DeviceSnapshot {
        DeviceSnapshot {
            id: id.clone(),
            handle: record.handle,
            endpoints: record.endpoints,
            status: record.status,
            link_health: record.link_health,
            stage: record.stage.clone(),
            retry_count: record.retry_count,
            last_error: record.last_error.clone(),
            metadata: record.metadata.clone(),
            latest_sample: record.latest_sample,
            calibrated: record.calibrated,
        }
    }

    pub fn status(&self, id: &DeviceId) -> Option<DeviceStatus> {
        self.inner.state.read().devices.get(id).map(|d| d.status)
    }

    /// Set a device's status, returning the previous one.
    ///
    /// Any state may follow any state.
    pub fn set_status(&self, id: &DeviceId, status: DeviceStatus) -> Option<DeviceStatus> {
        let mut state = self.inner.state.write();
        state.devices.get_mut(id).map(|d| {
            let previous = d.status;
            d.status = status;
            previous
        })
    }

    /// Set the free-form sub-phase label (UI progress only)
    pub fn set_stage(&self, id: &DeviceId, stage: impl Into<String>) {
        let mut state = self.inner.state.write();
        if let Some(d) = state.devices.get_mut(id) {
            d.stage = stage.into();
        }
    }

    pub fn handle(&self, id: &DeviceId) -> Option<LinkHandle> {
        self.inner.state.read().devices.get(id).and_then(|d| d.handle)
    }

    /// Store a fresh link handle. Cached endpoints are invalidated: a new
    /// link means rediscovery.
    pub fn set_handle(&self, id: &DeviceId, handle: LinkHandle) {
        let mut state = self.inner.state.write();
        if let Some(d) = state.devices.get_mut(id) {
            d.handle = Some(handle);
            d.endpoints = None;
        }
    }

    pub fn endpoints(&self, id: &DeviceId) -> Option<EndpointSet> {
        self.inner.state.read().devices.get(id).and_then(|d| d.endpoints)
    }

    pub fn set_endpoints(&self, id: &DeviceId, endpoints: EndpointSet) {
        let mut state = self.inner.state.write();
        if let Some(d) = state.devices.get_mut(id) {
            d.endpoints = Some(endpoints);
        }
    }

    pub fn link_health(&self, id: &DeviceId) -> Option<LinkHealth> {
        self.inner.state.read().devices.get(id).map(|d| d.link_health)
    }

    pub fn set_link_health(&self, id: &DeviceId, health: LinkHealth) {
        let mut state = self.inner.state.write();
        if let Some(d) = state.devices.get_mut(id) {
            d.link_health = health;
        }
    }

    pub fn set_metadata(&self, id: &DeviceId, metadata: DeviceMetadata) {
        let mut state = self.inner.state.write();
        if let Some(d) = state.devices.get_mut(id) {
            d.metadata = metadata;
        }
    }

    pub fn record_error(&self, id: &DeviceId, message: impl Into<String>) {
        let mut state = self.inner.state.write();
        if let Some(d) = state.devices.get_mut(id) {
            d.last_error = Some(message.into());
        }
    }

    /// Increment and return the device's retry counter
    pub fn bump_retry(&self, id: &DeviceId) -> u32 {
        let mut state = self.inner.state.write();
        state
            .devices
            .get_mut(id)
            .map(|d| {
                d.retry_count += 1;
                d.retry_count
            })
            .unwrap_or(0)
    }

    pub fn reset_retries(&self, id: &DeviceId) {
        let mut state = self.inner.state.write();
        if let Some(d) = state.devices.get_mut(id) {
            d.retry_count = 0;
        }
    }

    /// Overwrite the device's latest streamed sample
    pub fn record_sample(&self, id: &DeviceId, sample: PressureSample) {
        let mut state = self.inner.state.write();
        if let Some(d) = state.devices.get_mut(id) {
            d.latest_sample = Some(sample);
        }
    }

    pub fn latest_sample(&self, id: &DeviceId) -> Option<PressureSample> {
        self.inner.state.read().devices.get(id).and_then(|d| d.latest_sample)
    }

    pub fn mark_calibrated(&self, id: &DeviceId) {
        let mut state = self.inner.state.write();
        if let Some(d) = state.devices.get_mut(id) {
            d.calibrated = true;
        }
    }

    /// Install the streaming subscription guard, aborting any stale one
    pub fn install_subscription(&self, id: &DeviceId, guard: SubscriptionGuard) {
        let mut state = self.inner.state.write();
        if let Some(d) = state.devices.get_mut(id) {
            if let Some(stale) = d.subscription.replace(guard) {
                stale.pump.abort();
            }
        } else {
            // Device vanished while subscribing; don't leak the pump
            guard.pump.abort();
        }
    }

    /// Detach the subscription guard, aborting its pump. Returns the
    /// endpoint that still needs an async unsubscribe.
    pub fn take_subscription(&self, id: &DeviceId) -> Option<Endpoint> {
        let mut state = self.inner.state.write();
        let guard = state.devices.get_mut(id)?.subscription.take()?;
        guard.pump.abort();
        Some(guard.endpoint)
    }

    /// Remove a device from the collection and the setup queue.
    ///
    /// When the removed entry precedes the cursor, the cursor shifts back
    /// so no queued device is skipped or double-processed.
    pub fn remove(&self, id: &DeviceId) -> Option<RemovedDevice> {
        let mut state = self.inner.state.write();

        let mut record = state.devices.remove(id)?;
        let stream_endpoint = record.subscription.take().map(|guard| {
            guard.pump.abort();
            guard.endpoint
        });

        if let Some(pos) = state.queue.iter().position(|q| q == id) {
            state.queue.remove(pos);
            if pos < state.cursor {
                state.cursor -= 1;
            }
        }

        debug!(device = %id, "device removed from registry");
        Some(RemovedDevice {
            snapshot: Self::snap(id, &record),
            stream_endpoint,
        })
    }

    /// Next unresolved queue entry, without advancing
    pub fn queue_peek(&self) -> Option<DeviceId> {
        let state = self.inner.state.read();
        state.queue.get(state.cursor).cloned()
    }

    /// Advance past `id` if it is still the current queue entry.
    ///
    /// A device removed mid-setup already shifted the queue under us; in
    /// that case the cursor is left alone.
    pub fn queue_advance_past(&self, id: &DeviceId) {
        let mut state = self.inner.state.write();
        if state.queue.get(state.cursor) == Some(id) {
            state.cursor += 1;
        }
    }

    pub fn queue_cursor(&self) -> usize {
        self.inner.state.read().cursor
    }

    /// True when the whole batch is set up and usable
    pub fn batch_ready(&self) -> bool {
        self.inner.batch_ready.load(Ordering::Acquire)
    }

    /// Store the aggregate readiness flag, returning the previous value
    pub fn set_batch_ready(&self, ready: bool) -> bool {
        self.inner.batch_ready.swap(ready, Ordering::AcqRel)
    }

    /// Aggregate readiness: a non-empty batch where every device is in an
    /// operational state
    pub fn all_operational(&self) -> bool {
        let state = self.inner.state.read();
        !state.devices.is_empty()
            && state.devices.values().all(|d| d.status.is_operational())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn batch(ids: &[&str]) -> Vec<DeviceSeed> {
        ids.iter().map(|id| DeviceSeed::new(*id)).collect()
    }

    #[test]
    fn test_register_batch_resets_state() {
        let registry = Registry::new();
        registry.register_batch(batch(&["A", "B"]));
        registry.set_status(&"A".into(), DeviceStatus::Ready);
        registry.set_batch_ready(true);

        registry.register_batch(batch(&["C"]));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.status(&"C".into()), Some(DeviceStatus::Pending));
        assert_eq!(registry.queue_cursor(), 0);
        assert!(!registry.batch_ready());
    }

    #[test]
    fn test_remove_before_cursor_shifts_it() {
        let registry = Registry::new();
        registry.register_batch(batch(&["A", "B", "C"]));

        // A resolved, cursor now points at B
        registry.queue_advance_past(&"A".into());
        assert_eq!(registry.queue_peek(), Some("B".into()));

        // Removing A (before the cursor) must not skip B
        let removed = registry.remove(&"A".into()).unwrap();
        assert_eq!(removed.snapshot.id, DeviceId::from("A"));
        assert_eq!(registry.queue_peek(), Some("B".into()));
        assert_eq!(registry.queue_cursor(), 0);
    }

    #[test]
    fn test_remove_at_cursor_keeps_position() {
        let registry = Registry::new();
        registry.register_batch(batch(&["A", "B", "C"]));
        registry.queue_advance_past(&"A".into());

        // Removing the current entry makes the next one current
        registry.remove(&"B".into());
        assert_eq!(registry.queue_peek(), Some("C".into()));
    }

    #[test]
    fn test_advance_past_skips_stale_id() {
        let registry = Registry::new();
        registry.register_batch(batch(&["A", "B"]));

        registry.remove(&"A".into());
        // A is gone; advancing past it must not consume B's slot
        registry.queue_advance_past(&"A".into());
        assert_eq!(registry.queue_peek(), Some("B".into()));
    }

    #[test]
    fn test_status_transitions_unvalidated() {
        let registry = Registry::new();
        registry.register_batch(batch(&["A"]));
        let id = DeviceId::from("A");

        // Arbitrary jumps are allowed by design
        registry.set_status(&id, DeviceStatus::Failed);
        assert_eq!(
            registry.set_status(&id, DeviceStatus::Ready),
            Some(DeviceStatus::Failed)
        );
    }

    #[test]
    fn test_sample_overwrites() {
        let registry = Registry::new();
        registry.register_batch(batch(&["A"]));
        let id = DeviceId::from("A");

        registry.record_sample(&id, PressureSample::now(1.0));
        registry.record_sample(&id, PressureSample::now(2.0));

        assert_eq!(registry.latest_sample(&id).unwrap().value, 2.0);
    }

    #[test]
    fn test_set_handle_invalidates_endpoints() {
        let registry = Registry::new();
        registry.register_batch(batch(&["A"]));
        let id = DeviceId::from("A");

        registry.set_endpoints(
            &id,
            EndpointSet {
                command: Endpoint(1),
                stream: Endpoint(2),
                firmware_version: None,
                display_name: None,
                serial_number: None,
                model_number: None,
            },
        );
        registry.set_handle(&id, LinkHandle(7));

        assert!(registry.endpoints(&id).is_none());
        assert_eq!(registry.handle(&id), Some(LinkHandle(7)));
    }

    #[test]
    fn test_operational_ids_in_batch_order() {
        let registry = Registry::new();
        registry.register_batch(batch(&["C", "A", "B"]));
        for id in ["C", "A", "B"] {
            registry.set_status(&id.into(), DeviceStatus::Ready);
        }
        registry.set_status(&"A".into(), DeviceStatus::Failed);

        let ids: Vec<String> = registry
            .operational_ids()
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["C", "B"]);
    }
}
