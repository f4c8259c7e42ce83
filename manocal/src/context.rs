//! Shared orchestration context
//!
//! One explicitly-owned object holds every collaborator and the registry;
//! components receive it at construction. There is no ambient global and
//! no component reaches into a sibling.

use std::sync::Arc;

use tracing::{debug, info};

use manocal_transport::{DeviceLink, ReferenceController};
use manocal_types::{DeviceId, DeviceStatus};

use crate::{
    client::DeviceClient,
    config::Config,
    error::{Error, Result},
    event::{Event, EventSink},
    registry::{DeviceSnapshot, Registry},
};

pub struct Context {
    pub link: Arc<dyn DeviceLink>,
    pub reference: Arc<dyn ReferenceController>,
    pub registry: Registry,
    pub events: Arc<dyn EventSink>,
    pub config: Config,
}

impl Context {
    pub fn new(
        link: Arc<dyn DeviceLink>,
        reference: Arc<dyn ReferenceController>,
        events: Arc<dyn EventSink>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(Self {
            link,
            reference,
            registry: Registry::new(),
            events,
            config,
        })
    }

    /// Record a status change and notify listeners
    pub(crate) fn set_status(&self, id: &DeviceId, status: DeviceStatus) {
        if let Some(previous) = self.registry.set_status(id, status) {
            if previous != status {
                self.events.emit(Event::DeviceStatusChanged {
                    device: id.clone(),
                    from: previous,
                    to: status,
                });
            }
        }
    }

    /// Record a sub-phase label and notify listeners
    pub(crate) fn set_stage(&self, id: &DeviceId, stage: impl Into<String>) {
        let stage = stage.into();
        self.registry.set_stage(id, stage.clone());
        self.events.emit(Event::SetupStageChanged {
            device: id.clone(),
            stage,
        });
    }

    /// Whether the device's stored link handle is currently connected
    pub(crate) fn device_connected(&self, id: &DeviceId) -> bool {
        self.registry
            .handle(id)
            .map(|h| self.link.is_connected(h))
            .unwrap_or(false)
    }

    /// Tear down the device's streaming subscription, if any
    pub(crate) async fn teardown_subscription(&self, id: &DeviceId) {
        let Some(endpoint) = self.registry.take_subscription(id) else {
            return;
        };
        if let Some(handle) = self.registry.handle(id) {
            if let Err(e) = self.link.unsubscribe(handle, endpoint).await {
                debug!(device = %id, error = %e, "unsubscribe failed during teardown");
            }
        }
    }

    /// The one removal path: subscription teardown, then registry and
    /// queue excision, then the outbound notice.
    pub(crate) async fn remove_device(&self, id: &DeviceId, reason: &str) -> bool {
        self.teardown_subscription(id).await;

        if self.registry.remove(id).is_none() {
            return false;
        }

        info!(device = %id, reason, "device removed from batch");
        self.events.emit(Event::DeviceRemoved {
            device: id.clone(),
            reason: reason.to_owned(),
        });
        true
    }

    /// Build a command client for an operational device.
    ///
    /// Cached endpoints are never handed out for a device that is not in
    /// an operational state.
    pub(crate) fn client_for(&self, snapshot: &DeviceSnapshot) -> Result<DeviceClient<'_>> {
        if !snapshot.status.is_operational() {
            return Err(Error::NotReady {
                device: snapshot.id.clone(),
                status: snapshot.status,
            });
        }

        let handle = snapshot.handle.ok_or_else(|| Error::NotReady {
            device: snapshot.id.clone(),
            status: snapshot.status,
        })?;
        let endpoints = snapshot.endpoints.ok_or_else(|| Error::NotReady {
            device: snapshot.id.clone(),
            status: snapshot.status,
        })?;

        Ok(DeviceClient::new(
            self.link.as_ref(),
            snapshot.id.clone(),
            handle,
            endpoints,
            self.config.command_timeout,
        ))
    }
}
