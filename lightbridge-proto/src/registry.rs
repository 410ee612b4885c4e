//! Static lookups from radio advertisements to products and configured devices

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::profile::DeviceProfile;

/// User-facing identity of one light
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Radio address, e.g. "a4:c1:38:12:34:56"
    pub address: String,
    /// Friendly name shown on the bus
    pub name: String,
    /// Key used in bus topics
    pub unique_id: String,
}

/// Products and devices known to the bridge. Lookups never fail, an
/// unknown name or address simply yields `None`.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    products: Vec<Arc<DeviceProfile>>,
    devices: Vec<Arc<DeviceConfig>>,
}

impl Registry {
    /// Products are matched in order, so put more specific markers first.
    pub fn new(products: Vec<DeviceProfile>, devices: Vec<DeviceConfig>) -> Self {
        Self {
            products: products.into_iter().map(Arc::new).collect(),
            devices: devices.into_iter().map(Arc::new).collect(),
        }
    }

    /// First product whose marker is contained in the advertised name
    pub fn resolve_profile(&self, advertised_name: &str) -> Option<Arc<DeviceProfile>> {
        self.products
            .iter()
            .find(|p| p.matches(advertised_name))
            .cloned()
    }

    /// Configured device with this radio address (hex case is ignored)
    pub fn resolve_config(&self, address: &str) -> Option<Arc<DeviceConfig>> {
        self.devices
            .iter()
            .find(|d| d.address.eq_ignore_ascii_case(address))
            .cloned()
    }

    /// Product by its `id`
    pub fn product(&self, id: &str) -> Option<Arc<DeviceProfile>> {
        self.products.iter().find(|p| p.id == id).cloned()
    }

    pub fn products(&self) -> impl Iterator<Item = &DeviceProfile> {
        self.products.iter().map(|p| p.as_ref())
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceConfig> {
        self.devices.iter().map(|d| d.as_ref())
    }
}
