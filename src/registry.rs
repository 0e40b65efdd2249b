//! Management-side device registry
//!
//! Maps the opaque device ids handed out on registration to the network
//! location of each device. The operation layer only reads from it; the
//! server's registration handlers are the writers.

use crate::error::{Lwm2mError, Result};
use crate::transport::Endpoint;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

pub type DeviceId = u64;

/// A registered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    /// Endpoint client name (`ep`)
    pub name: String,
    /// Registration lifetime in seconds (`lt`)
    pub lifetime: u32,
    /// LWM2M version (`lwm2m`)
    pub version: String,
    /// Binding mode (`b`)
    pub binding: String,
    pub address: String,
    pub port: u16,
    /// Object URIs from the registration payload
    pub links: Vec<String>,
    /// Registration resource path, e.g. `/rd/1`
    pub location: String,
}

impl Device {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.address.clone(), self.port)
    }
}

/// Registration data submitted by a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub lifetime: u32,
    pub version: String,
    pub binding: String,
    pub address: String,
    pub port: u16,
    pub links: Vec<String>,
}

/// Changes carried by a registration update; `None` keeps the old value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationUpdate {
    pub lifetime: Option<u32>,
    pub binding: Option<String>,
    pub links: Option<Vec<String>>,
}

pub trait DeviceRegistry: Send + Sync {
    fn get(&self, id: DeviceId) -> Result<Device>;

    fn get_by_name(&self, name: &str) -> Result<Device>;

    fn list(&self) -> Result<Vec<Device>>;

    /// Store a registration, replacing any device with the same name
    fn register(&self, registration: Registration) -> Result<Device>;

    fn update(&self, id: DeviceId, update: RegistrationUpdate) -> Result<Device>;

    fn unregister(&self, id: DeviceId) -> Result<Device>;

    /// Put a previously returned record back under its own id
    fn restore(&self, device: Device) -> Result<()>;
}

#[derive(Debug, Default)]
struct Devices {
    next_id: DeviceId,
    by_id: BTreeMap<DeviceId, Device>,
}

/// In-memory device registry
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: Mutex<Devices>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Devices>> {
        self.devices
            .lock()
            .map_err(|_| Lwm2mError::Router("device registry lock poisoned".into()))
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn get(&self, id: DeviceId) -> Result<Device> {
        self.lock()?
            .by_id
            .get(&id)
            .cloned()
            .ok_or(Lwm2mError::RegistryLookupFailed(id))
    }

    fn get_by_name(&self, name: &str) -> Result<Device> {
        self.lock()?
            .by_id
            .values()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| Lwm2mError::ObjectNotFound(format!("device '{name}'")))
    }

    fn list(&self) -> Result<Vec<Device>> {
        Ok(self.lock()?.by_id.values().cloned().collect())
    }

    fn register(&self, registration: Registration) -> Result<Device> {
        let mut devices = self.lock()?;
        devices.by_id.retain(|_, d| d.name != registration.name);

        devices.next_id += 1;
        let id = devices.next_id;
        let device = Device {
            id,
            name: registration.name,
            lifetime: registration.lifetime,
            version: registration.version,
            binding: registration.binding,
            address: registration.address,
            port: registration.port,
            links: registration.links,
            location: format!("/rd/{id}"),
        };
        devices.by_id.insert(id, device.clone());
        Ok(device)
    }

    fn update(&self, id: DeviceId, update: RegistrationUpdate) -> Result<Device> {
        let mut devices = self.lock()?;
        let device = devices
            .by_id
            .get_mut(&id)
            .ok_or(Lwm2mError::RegistryLookupFailed(id))?;

        if let Some(lifetime) = update.lifetime {
            device.lifetime = lifetime;
        }
        if let Some(binding) = update.binding {
            device.binding = binding;
        }
        if let Some(links) = update.links {
            device.links = links;
        }
        Ok(device.clone())
    }

    fn unregister(&self, id: DeviceId) -> Result<Device> {
        self.lock()?
            .by_id
            .remove(&id)
            .ok_or(Lwm2mError::RegistryLookupFailed(id))
    }

    fn restore(&self, device: Device) -> Result<()> {
        let mut devices = self.lock()?;
        devices
            .by_id
            .retain(|id, d| *id == device.id || d.name != device.name);
        devices.by_id.insert(device.id, device);
        Ok(())
    }
}
