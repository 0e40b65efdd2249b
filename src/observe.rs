//! Active observation bookkeeping
//!
//! The protocol engine does not run CoAP Observe itself. It only exposes
//! cancel, cancel-all and list over whatever tracks the subscriptions.

use crate::address::Lwm2mAddress;
use crate::error::{Lwm2mError, Result};
use crate::registry::DeviceId;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub id: u64,
    pub device_id: DeviceId,
    pub address: Lwm2mAddress,
}

pub trait Observations: Send + Sync {
    fn cancel(&self, id: u64) -> Result<()>;

    fn cancel_all(&self) -> Result<()>;

    fn list(&self) -> Result<Vec<Observation>>;
}

#[derive(Debug, Default)]
struct Table {
    next_id: u64,
    active: Vec<Observation>,
}

/// In-memory observation table
#[derive(Debug, Default)]
pub struct ObservationSet {
    table: Mutex<Table>,
}

impl ObservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Table>> {
        self.table
            .lock()
            .map_err(|_| Lwm2mError::Router("observation table lock poisoned".into()))
    }

    /// Track a new observation and return its id
    pub fn add(&self, device_id: DeviceId, address: Lwm2mAddress) -> Result<u64> {
        let mut table = self.lock()?;
        table.next_id += 1;
        let id = table.next_id;
        table.active.push(Observation {
            id,
            device_id,
            address,
        });
        Ok(id)
    }
}

impl Observations for ObservationSet {
    fn cancel(&self, id: u64) -> Result<()> {
        let mut table = self.lock()?;
        let before = table.active.len();
        table.active.retain(|o| o.id != id);
        if table.active.len() == before {
            return Err(Lwm2mError::ObjectNotFound(format!("observation {id}")));
        }
        Ok(())
    }

    fn cancel_all(&self) -> Result<()> {
        self.lock()?.active.clear();
        Ok(())
    }

    fn list(&self) -> Result<Vec<Observation>> {
        Ok(self.lock()?.active.clone())
    }
}
