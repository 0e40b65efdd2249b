//! Device-side object store
//!
//! Holds the object instances a device exposes and their resource values.
//! The registration lifecycle lists it to build the registration payload
//! and the device's library handlers read and write through it.

use crate::address::Lwm2mAddress;
use crate::error::{Lwm2mError, Result};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// One object instance with its resource values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lwm2mObject {
    pub object_type: u16,
    pub object_id: u16,
    pub resources: BTreeMap<u16, String>,
}

impl Lwm2mObject {
    pub fn new(object_type: u16, object_id: u16) -> Self {
        Self {
            object_type,
            object_id,
            resources: BTreeMap::new(),
        }
    }

    /// URI used in registration payloads, e.g. `/3/0`
    pub fn object_uri(&self) -> String {
        Lwm2mAddress::instance(self.object_type, self.object_id).path()
    }
}

/// Storage for the objects a device exposes
pub trait ObjectRegistry: Send + Sync {
    /// Every instance, ordered by type then id
    fn list(&self) -> Result<Vec<Lwm2mObject>>;

    fn get(&self, object_type: u16, object_id: u16) -> Result<Lwm2mObject>;

    /// Create an empty instance, failing if it already exists
    fn create(&self, object_type: u16, object_id: u16) -> Result<Lwm2mObject>;

    fn remove(&self, object_type: u16, object_id: u16) -> Result<()>;

    fn get_resource(&self, object_type: u16, object_id: u16, resource_id: u16) -> Result<String>;

    /// Store a resource value; the instance must exist
    fn set_resource(
        &self,
        object_type: u16,
        object_id: u16,
        resource_id: u16,
        value: &str,
    ) -> Result<()>;

    /// URIs of every instance, as sent on registration
    fn object_uris(&self) -> Result<Vec<String>> {
        Ok(self.list()?.iter().map(Lwm2mObject::object_uri).collect())
    }
}

/// In-memory object store
#[derive(Debug, Default)]
pub struct MemoryObjectRegistry {
    objects: Mutex<BTreeMap<(u16, u16), Lwm2mObject>>,
}

impl MemoryObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<(u16, u16), Lwm2mObject>>> {
        self.objects
            .lock()
            .map_err(|_| Lwm2mError::Router("object registry lock poisoned".into()))
    }
}

fn not_found(address: Lwm2mAddress) -> Lwm2mError {
    Lwm2mError::ObjectNotFound(address.path())
}

impl ObjectRegistry for MemoryObjectRegistry {
    fn list(&self) -> Result<Vec<Lwm2mObject>> {
        Ok(self.lock()?.values().cloned().collect())
    }

    fn get(&self, object_type: u16, object_id: u16) -> Result<Lwm2mObject> {
        self.lock()?
            .get(&(object_type, object_id))
            .cloned()
            .ok_or_else(|| not_found(Lwm2mAddress::instance(object_type, object_id)))
    }

    fn create(&self, object_type: u16, object_id: u16) -> Result<Lwm2mObject> {
        let mut objects = self.lock()?;
        if objects.contains_key(&(object_type, object_id)) {
            return Err(Lwm2mError::BadRequest(format!(
                "{} already exists",
                Lwm2mAddress::instance(object_type, object_id)
            )));
        }
        let object = Lwm2mObject::new(object_type, object_id);
        objects.insert((object_type, object_id), object.clone());
        Ok(object)
    }

    fn remove(&self, object_type: u16, object_id: u16) -> Result<()> {
        self.lock()?
            .remove(&(object_type, object_id))
            .map(|_| ())
            .ok_or_else(|| not_found(Lwm2mAddress::instance(object_type, object_id)))
    }

    fn get_resource(&self, object_type: u16, object_id: u16, resource_id: u16) -> Result<String> {
        self.lock()?
            .get(&(object_type, object_id))
            .and_then(|object| object.resources.get(&resource_id))
            .cloned()
            .ok_or_else(|| not_found(Lwm2mAddress::resource(object_type, object_id, resource_id)))
    }

    fn set_resource(
        &self,
        object_type: u16,
        object_id: u16,
        resource_id: u16,
        value: &str,
    ) -> Result<()> {
        let mut objects = self.lock()?;
        let object = objects
            .get_mut(&(object_type, object_id))
            .ok_or_else(|| not_found(Lwm2mAddress::instance(object_type, object_id)))?;
        object.resources.insert(resource_id, value.to_string());
        Ok(())
    }
}
