//! In-memory radio and bus for tests
//!
//! Peripherals are identified by their address string. The radio records
//! negotiation stages, writes and disconnects, and can be told to misbehave
//! per address.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use lightbridge_proto::products::govee_gu10;
use lightbridge_proto::{DeviceConfig, DeviceProfile};

use crate::bus::{Bus, BusError};
use crate::negotiation::PendingConnection;
use crate::radio::{Characteristic, Radio, RadioError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `connect` never completes
    Hang,
    Refuse,
    ServicesError,
    NoService,
    CharacteristicsError,
    NoWriteEndpoint,
}

#[derive(Default)]
struct RadioState {
    log: Vec<String>,
    writes: Vec<(String, Vec<u8>)>,
    scan_starts: usize,
    scan_stops: usize,
    connect_delay: Duration,
    faults: HashMap<String, Fault>,
    fail_writes: bool,
    hang_disconnects: bool,
}

#[derive(Default)]
pub struct MockRadio {
    state: Mutex<RadioState>,
}

impl MockRadio {
    fn with<T>(&self, f: impl FnOnce(&mut RadioState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_fault(&self, address: &str, fault: Fault) {
        self.with(|s| s.faults.insert(address.to_string(), fault));
    }

    pub fn clear_fault(&self, address: &str) {
        self.with(|s| s.faults.remove(address));
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.with(|s| s.connect_delay = delay);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.with(|s| s.fail_writes = fail);
    }

    /// `disconnect` is logged and then never completes
    pub fn hang_disconnects(&self, hang: bool) {
        self.with(|s| s.hang_disconnects = hang);
    }

    /// Negotiation stages and disconnects, e.g. `connect:A`, `disconnect:A`
    pub fn log(&self) -> Vec<String> {
        self.with(|s| s.log.clone())
    }

    pub fn count(&self, entry: &str) -> usize {
        self.with(|s| s.log.iter().filter(|e| *e == entry).count())
    }

    pub fn writes_to(&self, address: &str) -> Vec<Vec<u8>> {
        self.with(|s| {
            s.writes
                .iter()
                .filter(|(a, _)| a == address)
                .map(|(_, bytes)| bytes.clone())
                .collect()
        })
    }

    pub fn scan_starts(&self) -> usize {
        self.with(|s| s.scan_starts)
    }

    pub fn scan_stops(&self) -> usize {
        self.with(|s| s.scan_stops)
    }

    fn fault(&self, address: &str) -> Option<Fault> {
        self.with(|s| s.faults.get(address).copied())
    }

    fn record(&self, entry: String) {
        self.with(|s| s.log.push(entry));
    }
}

fn refused(what: &str) -> RadioError {
    RadioError::Backend(format!("{what} refused"))
}

impl Radio for MockRadio {
    type Peripheral = String;
    type Service = String;
    type Endpoint = Uuid;

    async fn start_scan(&self) -> Result<(), RadioError> {
        self.with(|s| s.scan_starts += 1);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.with(|s| s.scan_stops += 1);
        Ok(())
    }

    async fn connect(&self, peripheral: &String) -> Result<(), RadioError> {
        self.record(format!("connect:{peripheral}"));
        let delay = self.with(|s| s.connect_delay);

        match self.fault(peripheral) {
            Some(Fault::Hang) => std::future::pending().await,
            Some(Fault::Refuse) => Err(refused("connect")),
            _ => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(())
            }
        }
    }

    async fn discover_services(
        &self,
        peripheral: &String,
        _uuid: Uuid,
    ) -> Result<Vec<String>, RadioError> {
        self.record(format!("services:{peripheral}"));
        match self.fault(peripheral) {
            Some(Fault::ServicesError) => Err(refused("service discovery")),
            Some(Fault::NoService) => Ok(vec![]),
            _ => Ok(vec![peripheral.clone()]),
        }
    }

    async fn discover_characteristics(
        &self,
        peripheral: &String,
        _service: &String,
        uuids: &[Uuid],
    ) -> Result<Vec<Characteristic<Uuid>>, RadioError> {
        self.record(format!("chars:{peripheral}"));
        match self.fault(peripheral) {
            Some(Fault::CharacteristicsError) => Err(refused("characteristic discovery")),
            Some(Fault::NoWriteEndpoint) => Ok(vec![]),
            _ => Ok(uuids
                .iter()
                .map(|uuid| Characteristic {
                    uuid: *uuid,
                    handle: *uuid,
                })
                .collect()),
        }
    }

    async fn write(
        &self,
        peripheral: &String,
        _endpoint: &Uuid,
        bytes: &[u8],
    ) -> Result<(), RadioError> {
        self.with(|s| {
            if s.fail_writes {
                return Err(refused("write"));
            }
            s.writes.push((peripheral.clone(), bytes.to_vec()));
            Ok(())
        })
    }

    async fn disconnect(&self, peripheral: &String) -> Result<(), RadioError> {
        self.record(format!("disconnect:{peripheral}"));
        if self.with(|s| s.hang_disconnects) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

#[derive(Default)]
struct BusState {
    published: Vec<Published>,
    subscribed: Vec<String>,
}

#[derive(Default)]
pub struct MockBus {
    state: Mutex<BusState>,
}

impl MockBus {
    pub fn published(&self) -> Vec<Published> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.state.lock().unwrap().subscribed.clone()
    }
}

impl Bus for MockBus {
    async fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BusError> {
        self.state.lock().unwrap().published.push(Published {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), BusError> {
        self.state
            .lock()
            .unwrap()
            .subscribed
            .push(topic.to_string());
        Ok(())
    }
}

/// A configured device at `address` with the given unique id
pub fn device(address: &str, unique_id: &str) -> DeviceConfig {
    DeviceConfig {
        address: address.to_string(),
        name: format!("Lamp {unique_id}"),
        unique_id: unique_id.to_string(),
    }
}

pub fn profile() -> Arc<DeviceProfile> {
    Arc::new(govee_gu10())
}

pub fn pending(address: &str, unique_id: &str) -> PendingConnection<String> {
    PendingConnection {
        peripheral: address.to_string(),
        config: Arc::new(device(address, unique_id)),
        profile: profile(),
    }
}
