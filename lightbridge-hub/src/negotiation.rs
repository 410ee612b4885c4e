//! Connection negotiation: connect, find the control service, find the
//! write endpoint. Each stage either advances or ends the attempt with a
//! [`NegotiationFailure`] naming the stage it failed in.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use lightbridge_proto::{DeviceConfig, DeviceProfile};

use crate::radio::{Radio, RadioError};

/// A discovered peripheral waiting for its connection attempt
#[derive(Debug)]
pub struct PendingConnection<P> {
    pub peripheral: P,
    pub config: Arc<DeviceConfig>,
    pub profile: Arc<DeviceProfile>,
}

impl<P: Clone> Clone for PendingConnection<P> {
    fn clone(&self) -> Self {
        Self {
            peripheral: self.peripheral.clone(),
            config: self.config.clone(),
            profile: self.profile.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Connecting => "connect",
            Stage::DiscoveringServices => "service discovery",
            Stage::DiscoveringCharacteristics => "characteristic discovery",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureKind {
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error("timed out")]
    Timeout,
    #[error("service {0} not found")]
    MissingService(Uuid),
    #[error("write characteristic {0} not found")]
    MissingEndpoint(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} failed: {kind}")]
pub struct NegotiationFailure {
    pub stage: Stage,
    pub kind: FailureKind,
}

impl NegotiationFailure {
    fn new(stage: Stage, kind: impl Into<FailureKind>) -> Self {
        Self {
            stage,
            kind: kind.into(),
        }
    }
}

/// Drive one peripheral from disconnected to a writable control endpoint.
///
/// Only the connect stage is bounded by `connect_timeout`. The caller owns
/// cleanup: on failure the peripheral may be half connected.
pub async fn negotiate<R: Radio>(
    radio: &R,
    pending: &PendingConnection<R::Peripheral>,
    connect_timeout: Duration,
) -> Result<R::Endpoint, NegotiationFailure> {
    let peripheral = &pending.peripheral;
    let profile = &pending.profile;

    match tokio::time::timeout(connect_timeout, radio.connect(peripheral)).await {
        Ok(result) => result.map_err(|e| NegotiationFailure::new(Stage::Connecting, e))?,
        Err(_) => return Err(NegotiationFailure::new(Stage::Connecting, FailureKind::Timeout)),
    }

    let services = radio
        .discover_services(peripheral, profile.service_uuid)
        .await
        .map_err(|e| NegotiationFailure::new(Stage::DiscoveringServices, e))?;
    let service = services.into_iter().next().ok_or_else(|| {
        NegotiationFailure::new(
            Stage::DiscoveringServices,
            FailureKind::MissingService(profile.service_uuid),
        )
    })?;

    let wanted = [
        profile.write_characteristic_uuid,
        profile.read_characteristic_uuid,
    ];
    let characteristics = radio
        .discover_characteristics(peripheral, &service, &wanted)
        .await
        .map_err(|e| NegotiationFailure::new(Stage::DiscoveringCharacteristics, e))?;

    characteristics
        .into_iter()
        .find(|c| c.uuid == profile.write_characteristic_uuid)
        .map(|c| c.handle)
        .ok_or_else(|| {
            NegotiationFailure::new(
                Stage::DiscoveringCharacteristics,
                FailureKind::MissingEndpoint(profile.write_characteristic_uuid),
            )
        })
}
