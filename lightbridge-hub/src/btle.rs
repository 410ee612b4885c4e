//! BLE radio backed by btleplug
//!
//! Wraps the first Bluetooth adapter of the host and translates its central
//! events into [`RadioEvent`]s.

use std::pin::Pin;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic as GattCharacteristic, Manager as _,
    Peripheral as _, ScanFilter, Service, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::radio::{Characteristic, Radio, RadioError, RadioEvent};

impl From<btleplug::Error> for RadioError {
    fn from(e: btleplug::Error) -> Self {
        RadioError::Backend(e.to_string())
    }
}

/// A peripheral seen during a one-shot scan
#[derive(Debug, Clone)]
pub struct ScannedPeripheral {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, RadioError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(RadioError::NoAdapter)
}

/// Scan for `duration` and list everything that advertised
pub async fn scan(duration: Duration) -> Result<Vec<ScannedPeripheral>, RadioError> {
    let adapter = get_adapter().await?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;
    let mut found = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            found.push(ScannedPeripheral {
                name: props.local_name.unwrap_or_else(|| "Unknown".to_string()),
                address: peripheral.address().to_string(),
                rssi: props.rssi,
            });
        }
    }

    adapter.stop_scan().await?;
    Ok(found)
}

pub struct BtleRadio {
    adapter: Adapter,
}

impl BtleRadio {
    /// Open the default adapter. The receiver yields its events until the
    /// adapter goes away or the receiver is dropped.
    pub async fn open() -> Result<(Self, mpsc::Receiver<RadioEvent<Peripheral>>), RadioError> {
        let adapter = get_adapter().await?;
        let events = adapter.events().await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(forward_events(adapter.clone(), events, tx));

        Ok((Self { adapter }, rx))
    }
}

async fn forward_events(
    adapter: Adapter,
    mut events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
    tx: mpsc::Sender<RadioEvent<Peripheral>>,
) {
    while let Some(event) = events.next().await {
        let event = match event {
            // duplicates matter: a peripheral that failed to connect is only
            // reconsidered when it advertises again
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                match discovered(&adapter, &id).await {
                    Ok(event) => event,
                    Err(e) => {
                        debug!(error = %e, "could not read advertisement");
                        continue;
                    }
                }
            }
            CentralEvent::DeviceDisconnected(id) => match adapter.peripheral(&id).await {
                Ok(peripheral) => RadioEvent::Disconnected {
                    address: peripheral.address().to_string(),
                },
                Err(e) => {
                    debug!(error = %e, "disconnect from unknown peripheral");
                    continue;
                }
            },
            CentralEvent::StateUpdate(CentralState::PoweredOn) => RadioEvent::PoweredOn,
            CentralEvent::StateUpdate(CentralState::PoweredOff) => RadioEvent::PoweredOff,
            _ => continue,
        };

        if tx.send(event).await.is_err() {
            break;
        }
    }
    debug!("adapter event stream ended");
}

async fn discovered(
    adapter: &Adapter,
    id: &PeripheralId,
) -> Result<RadioEvent<Peripheral>, RadioError> {
    let peripheral = adapter.peripheral(id).await?;
    let name = peripheral.properties().await?.and_then(|p| p.local_name);
    let address = peripheral.address().to_string();
    Ok(RadioEvent::Discovered {
        peripheral,
        address,
        name,
    })
}

impl Radio for BtleRadio {
    type Peripheral = Peripheral;
    type Service = Service;
    type Endpoint = GattCharacteristic;

    async fn start_scan(&self) -> Result<(), RadioError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, peripheral: &Peripheral) -> Result<(), RadioError> {
        peripheral.connect().await?;
        Ok(())
    }

    async fn discover_services(
        &self,
        peripheral: &Peripheral,
        uuid: Uuid,
    ) -> Result<Vec<Service>, RadioError> {
        peripheral.discover_services().await?;
        Ok(peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == uuid)
            .collect())
    }

    async fn discover_characteristics(
        &self,
        _peripheral: &Peripheral,
        service: &Service,
        uuids: &[Uuid],
    ) -> Result<Vec<Characteristic<GattCharacteristic>>, RadioError> {
        // btleplug resolves characteristics together with the services
        Ok(service
            .characteristics
            .iter()
            .filter(|c| uuids.contains(&c.uuid))
            .map(|c| Characteristic {
                uuid: c.uuid,
                handle: c.clone(),
            })
            .collect())
    }

    async fn write(
        &self,
        peripheral: &Peripheral,
        endpoint: &GattCharacteristic,
        bytes: &[u8],
    ) -> Result<(), RadioError> {
        peripheral
            .write(endpoint, bytes, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&self, peripheral: &Peripheral) -> Result<(), RadioError> {
        peripheral.disconnect().await?;
        Ok(())
    }
}
