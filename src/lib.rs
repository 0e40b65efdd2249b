//! rust-lwm2m - Rust implementation of the OMA Lightweight M2M protocol engine
//!
//! This library routes inbound CoAP requests to LWM2M operations, issues
//! device-management operations from a server against registered devices,
//! and drives a device's registration lifecycle (register, update,
//! unregister) with a management server.
//!
//! # Example
//!
//! ```no_run
//! use rust_lwm2m::{ClientConfig, Lwm2mClient, MemoryObjectRegistry, ObjectRegistry, UdpTransport};
//! use std::sync::Arc;
//!
//! // Objects the device exposes
//! let objects = Arc::new(MemoryObjectRegistry::new());
//! objects.create(3, 0).unwrap();
//! objects.set_resource(3, 0, 0, "Open Mobile Alliance").unwrap();
//!
//! // Register with a server and keep the registration alive
//! let client = Lwm2mClient::new(Arc::new(UdpTransport::default()), objects, ClientConfig::default());
//! let device = client.register("localhost", 5683, "", "weather-station").unwrap();
//! client.update(&device).unwrap();
//! client.unregister(device).unwrap();
//! ```

pub mod address;
pub mod attributes;
pub mod client;
pub mod coap_types;
pub mod config;
mod error;
pub mod links;
pub mod management;
pub mod objects;
pub mod observe;
pub mod registration;
pub mod registry;
pub mod router;
pub mod server;
pub mod transport;
pub mod udp;

pub use address::Lwm2mAddress;
pub use attributes::{Attribute, AttributeSet};
pub use config::{ClientConfig, Config, ServerConfig};
pub use error::{Lwm2mError, Result};
pub use management::DeviceManagement;
pub use objects::{Lwm2mObject, MemoryObjectRegistry, ObjectRegistry};
pub use observe::{Observation, ObservationSet, Observations};
pub use registration::{DeviceInformation, Lwm2mClient};
pub use registry::{Device, DeviceId, DeviceRegistry, MemoryRegistry};
pub use router::{Operation, ServerInfo, UserHandler};
pub use server::Lwm2mServer;
pub use transport::{Endpoint, Transport};
pub use udp::UdpTransport;
