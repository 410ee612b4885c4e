//! MQTT bus backed by rumqttc

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::bus::{Bus, BusError, BusEvent};
use crate::config::MqttConfig;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

impl From<rumqttc::ClientError> for BusError {
    fn from(e: rumqttc::ClientError) -> Self {
        BusError::Client(e.to_string())
    }
}

pub struct MqttBus {
    client: AsyncClient,
}

impl MqttBus {
    /// Start the client. The connection is made in the background and
    /// retried forever; every (re)connect shows up as [`BusEvent::Connected`].
    pub fn connect(config: &MqttConfig) -> (Self, mpsc::Receiver<BusEvent>) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump(eventloop, tx, config.host.clone()));

        (Self { client }, rx)
    }
}

async fn pump(mut eventloop: EventLoop, tx: mpsc::Sender<BusEvent>, host: String) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(host = %host, "connected to MQTT broker");
                BusEvent::Connected
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => BusEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            },
            Ok(_) => continue,
            Err(e) => {
                warn!(host = %host, error = %e, "MQTT connection error, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        if tx.send(event).await.is_err() {
            break;
        }
    }
}

impl Bus for MqttBus {
    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        self.client.subscribe(topic, QoS::AtLeastOnce).await?;
        Ok(())
    }
}
