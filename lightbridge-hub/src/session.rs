//! Live state of a connected light and its keep-alive heartbeat

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use lightbridge_proto::{Command, DeviceConfig, DeviceProfile};

use crate::negotiation::PendingConnection;
use crate::radio::Radio;

/// Exists only while the peripheral is connected
pub struct DeviceSession<R: Radio> {
    pub peripheral: R::Peripheral,
    pub config: Arc<DeviceConfig>,
    pub profile: Arc<DeviceProfile>,
    pub endpoint: R::Endpoint,
    keep_alive: Option<KeepAlive>,
}

impl<R: Radio> DeviceSession<R> {
    pub fn new(pending: PendingConnection<R::Peripheral>, endpoint: R::Endpoint) -> Self {
        Self {
            peripheral: pending.peripheral,
            config: pending.config,
            profile: pending.profile,
            endpoint,
            keep_alive: None,
        }
    }

    pub fn unique_id(&self) -> &str {
        &self.config.unique_id
    }

    /// Send the profile's keep-alive frame now and then every `interval`.
    /// Profiles without a keep-alive template get no heartbeat.
    pub fn start_keep_alive(&mut self, radio: Arc<R>, interval: Duration) {
        let frame = match self.profile.frame(&Command::KeepAlive) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(device = %self.config.name, error = %e, "no keep-alive");
                return;
            }
        };

        self.keep_alive = Some(KeepAlive::start(
            radio,
            self.peripheral.clone(),
            self.endpoint.clone(),
            frame,
            interval,
            self.config.name.clone(),
        ));
    }

    /// Tear the session down, stopping its heartbeat, and hand back what is
    /// needed to connect again.
    pub fn into_pending(self) -> PendingConnection<R::Peripheral> {
        let DeviceSession {
            peripheral,
            config,
            profile,
            keep_alive,
            ..
        } = self;
        drop(keep_alive);
        PendingConnection {
            peripheral,
            config,
            profile,
        }
    }
}

/// Periodic heartbeat task. Dropping it cancels the task.
pub struct KeepAlive {
    task: JoinHandle<()>,
}

impl KeepAlive {
    pub fn start<R: Radio>(
        radio: Arc<R>,
        peripheral: R::Peripheral,
        endpoint: R::Endpoint,
        frame: Vec<u8>,
        interval: Duration,
        device: String,
    ) -> Self {
        let task = tokio::spawn(async move {
            // first tick completes immediately
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match radio.write(&peripheral, &endpoint, &frame).await {
                    Ok(()) => debug!(device = %device, "keep-alive sent"),
                    Err(e) => warn!(device = %device, error = %e, "keep-alive write failed"),
                }
            }
        });
        Self { task }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.task.abort();
    }
}
