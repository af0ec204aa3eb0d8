use super::protocol::{self, Device, ListAndWatchResponse};

/// Health of a single accelerator unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHealth {
    Healthy,
    Unhealthy,
}

impl DeviceHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceHealth::Healthy => protocol::HEALTHY,
            DeviceHealth::Unhealthy => protocol::UNHEALTHY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: String,
    pub health: DeviceHealth,
}

/// Index of `id` in an inventory of `count` units, if it names one.
pub fn parse_device_id(id: &str, count: usize) -> Option<usize> {
    id.parse::<usize>().ok().filter(|n| *n < count)
}

/// Fixed-size, ordered set of units advertised by one server instance.
///
/// Ids are `"0".."n-1"`. The size never changes; only health does, and
/// only through the stream task that owns the health inbox.
#[derive(Debug, Clone)]
pub struct DeviceInventory {
    devices: Vec<DeviceRecord>,
}

impl DeviceInventory {
    pub fn build(n: usize) -> Self {
        let devices = (0..n)
            .map(|id| DeviceRecord {
                id: id.to_string(),
                health: DeviceHealth::Healthy,
            })
            .collect();
        Self { devices }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    /// Parse `id` and check it names a unit of this inventory.
    pub fn resolve(&self, id: &str) -> Option<usize> {
        parse_device_id(id, self.devices.len())
    }

    /// Returns false if `id` is not part of the inventory.
    pub fn mark_unhealthy(&mut self, id: &str) -> bool {
        match self.resolve(id) {
            Some(index) => {
                self.devices[index].health = DeviceHealth::Unhealthy;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_unhealthy(&mut self) {
        for dev in &mut self.devices {
            dev.health = DeviceHealth::Unhealthy;
        }
    }

    /// Full device list in the form ListAndWatch sends it.
    pub fn snapshot(&self) -> ListAndWatchResponse {
        ListAndWatchResponse {
            devices: self
                .devices
                .iter()
                .map(|d| Device {
                    id: d.id.clone(),
                    health: d.health.as_str().to_string(),
                    topology: None,
                })
                .collect(),
        }
    }
}
