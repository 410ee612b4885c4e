//! The radio capability the connection manager drives
//!
//! Implemented for real adapters in [`crate::btle`]; tests use an in-memory
//! radio. Completion of every operation is signalled by its future resolving,
//! unsolicited happenings (discoveries, disconnects) arrive as [`RadioEvent`]s.

use std::future::Future;

use uuid::Uuid;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RadioError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("radio error: {0}")]
    Backend(String),
}

/// Unsolicited event from the radio
#[derive(Debug, Clone)]
pub enum RadioEvent<P> {
    /// A peripheral advertised itself. Repeats for the same peripheral are expected.
    Discovered {
        peripheral: P,
        address: String,
        name: Option<String>,
    },
    /// A connected peripheral went away
    Disconnected { address: String },
    PoweredOn,
    PoweredOff,
}

/// A discovered characteristic and the handle used to write to it
#[derive(Debug, Clone)]
pub struct Characteristic<H> {
    pub uuid: Uuid,
    pub handle: H,
}

pub trait Radio: Send + Sync + 'static {
    type Peripheral: Clone + Send + Sync + 'static;
    type Service: Send + Sync + 'static;
    type Endpoint: Clone + Send + Sync + 'static;

    /// Scan for advertisements, reporting repeats of the same peripheral
    fn start_scan(&self) -> impl Future<Output = Result<(), RadioError>> + Send;

    fn stop_scan(&self) -> impl Future<Output = Result<(), RadioError>> + Send;

    fn connect(
        &self,
        peripheral: &Self::Peripheral,
    ) -> impl Future<Output = Result<(), RadioError>> + Send;

    /// Services of a connected peripheral matching `uuid`
    fn discover_services(
        &self,
        peripheral: &Self::Peripheral,
        uuid: Uuid,
    ) -> impl Future<Output = Result<Vec<Self::Service>, RadioError>> + Send;

    /// Characteristics of `service` whose uuid is in `uuids`
    fn discover_characteristics(
        &self,
        peripheral: &Self::Peripheral,
        service: &Self::Service,
        uuids: &[Uuid],
    ) -> impl Future<Output = Result<Vec<Characteristic<Self::Endpoint>>, RadioError>> + Send;

    /// Write without response
    fn write(
        &self,
        peripheral: &Self::Peripheral,
        endpoint: &Self::Endpoint,
        bytes: &[u8],
    ) -> impl Future<Output = Result<(), RadioError>> + Send;

    fn disconnect(
        &self,
        peripheral: &Self::Peripheral,
    ) -> impl Future<Output = Result<(), RadioError>> + Send;
}
