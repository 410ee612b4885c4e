//! Lightbridge hub: connects configured BLE lights and serves their commands
//! from an MQTT home-automation hub.

pub mod announce;
pub mod btle;
pub mod bus;
pub mod config;
pub mod manager;
#[cfg(test)]
mod mock;
pub mod mqtt;
pub mod negotiation;
pub mod radio;
pub mod session;
pub mod topics;

use std::sync::Arc;

pub use bus::{Bus, BusError, BusEvent};
pub use config::{Config, ConfigError, MqttConfig, Timing, lightbridge_home};
pub use manager::{ConnectionManager, Settings};
pub use negotiation::{FailureKind, NegotiationFailure, PendingConnection, Stage};
pub use radio::{Radio, RadioError, RadioEvent};
pub use topics::{Capability, CommandError, InboundCommand, Topics};

/// Open the Bluetooth adapter, connect to the broker and manage lights until
/// the adapter's event stream ends.
pub async fn run(config: Config) -> Result<(), RadioError> {
    let (radio, radio_events) = btle::BtleRadio::open().await?;
    let (bus, bus_events) = mqtt::MqttBus::connect(&config.mqtt);

    let manager = ConnectionManager::new(
        config.registry(),
        Arc::new(radio),
        Arc::new(bus),
        config.topics(),
        config.settings(),
    );
    manager.run(radio_events, bus_events).await;
    Ok(())
}
