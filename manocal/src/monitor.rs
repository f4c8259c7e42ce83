//! Periodic connectivity watchdog
//!
//! Polls every registered device's link state on a fixed period. A link
//! that silently died gets its device reclassified as disconnected and
//! its subscription torn down; reconnection is never attempted here, it
//! is an explicit operation the operator or the setup orchestrator
//! invokes. This is the only component allowed to mutate device status
//! from the side of an active sequence.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use manocal_types::{DeviceStatus, LinkHealth};

use crate::{context::Context, event::Event};

pub struct ConnectivityMonitor {
    ctx: Arc<Context>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            task: Mutex::new(None),
        }
    }

    /// Start the periodic check. Idempotent while running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let ctx = self.ctx.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(ctx.config.monitor_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                Self::sweep(&ctx).await;
            }
        }));
        debug!("connectivity monitor started");
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!("connectivity monitor stopped");
        }
    }

    /// Run one check immediately
    pub async fn check_now(&self) {
        Self::sweep(&self.ctx).await;
    }

    async fn sweep(ctx: &Context) {
        for snapshot in ctx.registry.snapshots() {
            let Some(handle) = snapshot.handle else {
                continue;
            };
            if snapshot.status == DeviceStatus::Disconnected {
                continue;
            }

            if !ctx.link.is_connected(handle) {
                warn!(device = %snapshot.id, "connectivity lost");
                ctx.registry.set_link_health(&snapshot.id, LinkHealth::Down);
                ctx.set_status(&snapshot.id, DeviceStatus::Disconnected);
                ctx.set_stage(&snapshot.id, "connection lost");
                ctx.teardown_subscription(&snapshot.id).await;
                ctx.events.emit(Event::ConnectivityLost {
                    device: snapshot.id.clone(),
                });
            }
        }

        let ready = ctx.registry.all_operational();
        if ctx.registry.set_batch_ready(ready) != ready {
            ctx.events.emit(Event::BatchReadyChanged { ready });
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
