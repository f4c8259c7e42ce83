//! Per-device setup orchestration
//!
//! Walks the setup queue strictly in order, bringing each device from
//! freshly-registered to streaming-and-ready: connect (or reuse the open
//! link), discover endpoints, best-effort metadata read, install the
//! streaming subscription. One device fully resolves before the next is
//! touched; the wireless medium is shared and does not reward concurrency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use manocal_core::decode_sample;
use manocal_transport::{Endpoint, EndpointSet, NotificationStream};
use manocal_types::{DeviceId, DeviceMetadata, DeviceStatus, LinkHealth, PressureSample};

use crate::{
    client::DeviceClient,
    context::Context,
    error::{Error, Result},
    event::Event,
    registry::{Registry, SubscriptionGuard},
};

/// How often a paused run re-checks whether it may continue
const PAUSE_POLL: Duration = Duration::from_millis(50);

pub struct SetupOrchestrator {
    ctx: Arc<Context>,
    in_progress: AtomicBool,
    paused: AtomicBool,
}

impl SetupOrchestrator {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            in_progress: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    /// Hold the queue after the current device resolves.
    ///
    /// Used while a device is being forcibly removed so the removal never
    /// races the sequence.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Continue from the next unresolved queue position
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Process the setup queue until it is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SetupInProgress`] if a run is already active.
    /// Per-device failures never propagate: a device that exhausts its
    /// attempts is marked failed and the queue moves on.
    pub async fn run(&self) -> Result<()> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::SetupInProgress);
        }

        let result = self.process_queue().await;
        self.in_progress.store(false, Ordering::Release);
        result
    }

    async fn process_queue(&self) -> Result<()> {
        while let Some(id) = self.next_in_queue().await {
            self.setup_with_retries(&id).await;
            self.ctx.registry.queue_advance_past(&id);
            sleep(self.ctx.config.setup_inter_device_delay).await;
        }

        info!("setup queue drained");
        Ok(())
    }

    /// Next queue entry, waiting out any external pause first
    async fn next_in_queue(&self) -> Option<DeviceId> {
        while self.paused.load(Ordering::Acquire) {
            sleep(PAUSE_POLL).await;
        }
        self.ctx.registry.queue_peek()
    }

    async fn setup_with_retries(&self, id: &DeviceId) {
        let cfg = &self.ctx.config;
        let mut last_cause = String::new();

        for attempt in 1..=cfg.setup_retries {
            // The device may have been forcibly removed between attempts
            if !self.ctx.registry.contains(id) {
                return;
            }

            match self.setup_device(id).await {
                Ok(()) => {
                    if !self.ctx.registry.contains(id) {
                        return;
                    }
                    self.ctx.registry.reset_retries(id);
                    self.ctx.set_status(id, DeviceStatus::Ready);
                    self.ctx.set_stage(id, "ready");
                    self.ctx.events.emit(Event::SetupCompleted { device: id.clone() });
                    info!(device = %id, attempt, "device ready");
                    return;
                }
                Err(e) => {
                    warn!(device = %id, attempt, error = %e, "setup attempt failed");
                    last_cause = e.to_string();
                    self.ctx.registry.record_error(id, &last_cause);
                    self.ctx.registry.bump_retry(id);
                    self.ctx.events.emit(Event::SetupRetry {
                        device: id.clone(),
                        attempt,
                        cause: last_cause.clone(),
                    });
                    if attempt < cfg.setup_retries {
                        sleep(cfg.setup_retry_delay).await;
                    }
                }
            }
        }

        // Stays in the batch for the operator to see, but calibration
        // will not touch it
        self.ctx.set_status(id, DeviceStatus::Failed);
        self.ctx.set_stage(id, "setup failed");
        self.ctx.events.emit(Event::SetupFailed {
            device: id.clone(),
            cause: last_cause,
        });
    }

    async fn setup_device(&self, id: &DeviceId) -> Result<()> {
        let ctx = &self.ctx;
        let cfg = &ctx.config;

        // A subscription from a previous life must be gone before the
        // link is reused or reopened
        ctx.teardown_subscription(id).await;

        ctx.set_status(id, DeviceStatus::Connecting);
        ctx.set_stage(id, "connecting");
        let handle = match ctx.registry.handle(id) {
            // Link already open: reuse it as-is
            Some(h) if ctx.link.is_connected(h) => h,
            _ => {
                let h = ctx.link.connect(id, cfg.connect_timeout).await?;
                ctx.registry.set_handle(id, h);
                h
            }
        };

        ctx.set_status(id, DeviceStatus::Discovering);
        ctx.set_stage(id, "discovering endpoints");
        let endpoints = match ctx.link.discover(handle, cfg.discovery_timeout).await {
            Ok(endpoints) => {
                ctx.registry.set_link_health(id, LinkHealth::Healthy);
                endpoints
            }
            Err(e) => {
                // Link up but endpoints unresolvable is its own condition,
                // distinct from a dead link
                let health = if ctx.link.is_connected(handle) {
                    LinkHealth::Undiscoverable
                } else {
                    LinkHealth::Down
                };
                ctx.registry.set_link_health(id, health);
                return Err(e.into());
            }
        };
        ctx.registry.set_endpoints(id, endpoints);

        ctx.set_stage(id, "reading metadata");
        let client = DeviceClient::new(
            ctx.link.as_ref(),
            id.clone(),
            handle,
            endpoints,
            cfg.command_timeout,
        );
        let metadata = self.read_metadata(id, &client, &endpoints).await;
        if !metadata.is_empty() {
            ctx.registry.set_metadata(id, metadata);
        }

        ctx.set_status(id, DeviceStatus::Subscribing);
        ctx.set_stage(id, "subscribing to pressure stream");
        let stream = ctx
            .link
            .subscribe(handle, endpoints.stream, cfg.subscription_timeout)
            .await?;
        let pump = tokio::spawn(pump_samples(ctx.registry.clone(), id.clone(), stream));
        ctx.registry.install_subscription(
            id,
            SubscriptionGuard {
                endpoint: endpoints.stream,
                pump,
            },
        );

        Ok(())
    }

    /// Best-effort metadata read; never fails setup
    async fn read_metadata(
        &self,
        id: &DeviceId,
        client: &DeviceClient<'_>,
        endpoints: &EndpointSet,
    ) -> DeviceMetadata {
        DeviceMetadata {
            firmware_version: self
                .read_field(id, client, endpoints.firmware_version, "firmware version")
                .await,
            display_name: self
                .read_field(id, client, endpoints.display_name, "display name")
                .await,
            serial_number: self
                .read_field(id, client, endpoints.serial_number, "serial number")
                .await,
            model_number: self
                .read_field(id, client, endpoints.model_number, "model number")
                .await,
        }
    }

    async fn read_field(
        &self,
        id: &DeviceId,
        client: &DeviceClient<'_>,
        endpoint: Option<Endpoint>,
        what: &'static str,
    ) -> Option<String> {
        let endpoint = endpoint?;
        let cfg = &self.ctx.config;

        for attempt in 1..=cfg.metadata_retries {
            match client.read_string(endpoint).await {
                Ok(text) if !text.is_empty() => return Some(text),
                Ok(_) => return None,
                Err(e) => {
                    debug!(device = %id, what, attempt, error = %e, "metadata read failed");
                    if attempt < cfg.metadata_retries {
                        sleep(cfg.metadata_retry_delay).await;
                    }
                }
            }
        }

        warn!(device = %id, what, "metadata unavailable, continuing without it");
        None
    }
}

/// Decode each streamed notification and keep the registry's latest
/// sample current. Runs until the stream closes or the subscription is
/// torn down.
async fn pump_samples(registry: Registry, id: DeviceId, mut stream: NotificationStream) {
    while let Some(payload) = stream.recv().await {
        match decode_sample(&payload) {
            Ok(value) => registry.record_sample(&id, PressureSample::now(value)),
            Err(e) => warn!(device = %id, error = %e, "discarding malformed sample"),
        }
    }
    debug!(device = %id, "pressure stream closed");
}
