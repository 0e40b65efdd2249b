//! Management server
//!
//! Serves the registration interface (`/rd`) so devices can register,
//! update and unregister, and bundles the device registry, the
//! observation set and the device management operations behind one
//! handle.

use crate::coap_types::{Method, Request, Response};
use crate::config::ServerConfig;
use crate::error::{Lwm2mError, Result};
use crate::links::parse_links;
use crate::management::DeviceManagement;
use crate::observe::{Observation, ObservationSet, Observations};
use crate::registry::{Device, DeviceId, DeviceRegistry, Registration, RegistrationUpdate};
use crate::router::{HandlerTable, Operation, PathPattern, Route, ServerInfo, UserHandler};
use crate::transport::Transport;
use std::sync::Arc;

/// Registration interface routes
pub fn routes() -> Vec<Route> {
    vec![
        Route::new(
            Method::Post,
            PathPattern::segments("/rd"),
            Operation::Registration,
        ),
        Route::new(
            Method::Post,
            PathPattern::segments("/rd/:id"),
            Operation::UpdateRegistration,
        ),
        Route::new(
            Method::Put,
            PathPattern::segments("/rd/:id"),
            Operation::UpdateRegistration,
        ),
        Route::new(
            Method::Delete,
            PathPattern::segments("/rd/:id"),
            Operation::Unregistration,
        ),
    ]
}

/// Library handlers writing into `registry`
pub fn handlers(registry: Arc<dyn DeviceRegistry>, config: &ServerConfig) -> HandlerTable {
    let mut table = HandlerTable::new();

    let devices = registry.clone();
    let default_lifetime = config.default_lifetime;
    table.insert(Operation::Registration, move |request, user| {
        respond(handle_registration(
            devices.as_ref(),
            default_lifetime,
            request,
            user,
        ))
    });

    let devices = registry.clone();
    table.insert(Operation::UpdateRegistration, move |request, user| {
        respond(handle_update(devices.as_ref(), request, user))
    });

    let devices = registry;
    table.insert(Operation::Unregistration, move |request, user| {
        respond(handle_unregistration(devices.as_ref(), request, user))
    });

    table
}

fn respond(result: Result<Response>) -> Response {
    result.unwrap_or_else(|e| {
        log::debug!("Registration interface request failed: {}", e);
        Response::error(e.response_code(), &e.to_string())
    })
}

fn parse_lifetime(value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| Lwm2mError::BadRequest(format!("invalid lifetime '{value}'")))
}

fn registration_id(request: &Request) -> Result<DeviceId> {
    request
        .segments()
        .last()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| Lwm2mError::BadRequest(format!("no registration id in {}", request.path)))
}

fn handle_registration(
    registry: &dyn DeviceRegistry,
    default_lifetime: u32,
    request: &Request,
    user: &UserHandler,
) -> Result<Response> {
    let name = request
        .query_param("ep")
        .filter(|ep| !ep.is_empty())
        .ok_or_else(|| Lwm2mError::BadRequest("missing endpoint name (ep)".into()))?;
    let lifetime = match request.query_param("lt") {
        Some(lt) => parse_lifetime(&lt)?,
        None => default_lifetime,
    };
    let source = request
        .source
        .ok_or_else(|| Lwm2mError::BadRequest("unknown request source".into()))?;

    let replaced = registry.get_by_name(&name).ok();
    let device = registry.register(Registration {
        name,
        lifetime,
        version: request
            .query_param("lwm2m")
            .unwrap_or_else(|| "1.0".to_string()),
        binding: request.query_param("b").unwrap_or_else(|| "U".to_string()),
        address: source.ip().to_string(),
        port: source.port(),
        links: parse_links(&request.payload_text()),
    })?;

    // A rejected registration leaves the registry as it was
    if let Err(e) = user.on_device(&device) {
        registry.unregister(device.id)?;
        if let Some(previous) = replaced {
            registry.restore(previous)?;
        }
        return Err(e);
    }

    log::info!(
        "Device '{}' registered as {} from {}",
        device.name,
        device.id,
        source
    );
    Ok(Response::created(&device.location))
}

fn handle_update(
    registry: &dyn DeviceRegistry,
    request: &Request,
    user: &UserHandler,
) -> Result<Response> {
    let id = registration_id(request)?;
    let lifetime = request
        .query_param("lt")
        .map(|lt| parse_lifetime(&lt))
        .transpose()?;
    let links = (!request.payload.is_empty()).then(|| parse_links(&request.payload_text()));

    let previous = registry.get(id)?;
    let device = registry.update(
        id,
        RegistrationUpdate {
            lifetime,
            binding: request.query_param("b"),
            links,
        },
    )?;
    if let Err(e) = user.on_device(&device) {
        registry.restore(previous)?;
        return Err(e);
    }
    log::debug!("Device {} updated its registration", id);
    Ok(Response::changed())
}

fn handle_unregistration(
    registry: &dyn DeviceRegistry,
    request: &Request,
    user: &UserHandler,
) -> Result<Response> {
    let id = registration_id(request)?;
    let device = registry.get(id)?;
    user.on_device(&device)?;
    registry.unregister(id)?;
    log::info!("Device '{}' ({}) unregistered", device.name, id);
    Ok(Response::deleted())
}

/// A running LWM2M management server
pub struct Lwm2mServer {
    server: ServerInfo,
    registry: Arc<dyn DeviceRegistry>,
    observations: Arc<ObservationSet>,
    management: DeviceManagement,
}

impl Lwm2mServer {
    /// Listen on `config.port` and accept registrations into `registry`
    pub fn start(
        transport: Arc<dyn Transport>,
        registry: Arc<dyn DeviceRegistry>,
        config: &ServerConfig,
    ) -> Result<Self> {
        let server = ServerInfo::start(
            transport.as_ref(),
            config.port,
            routes(),
            handlers(registry.clone(), config),
        )?;
        Ok(Self {
            server,
            management: DeviceManagement::new(transport, registry.clone()),
            registry,
            observations: Arc::new(ObservationSet::new()),
        })
    }

    pub fn stop(self) -> Result<()> {
        self.server.stop()
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// Install application logic for registration events
    pub fn set_handler(&self, handler: UserHandler) -> Result<()> {
        self.server.set_handler(handler)
    }

    /// Operations against registered devices
    pub fn management(&self) -> &DeviceManagement {
        &self.management
    }

    pub fn registry(&self) -> &Arc<dyn DeviceRegistry> {
        &self.registry
    }

    pub fn get_device(&self, id: DeviceId) -> Result<Device> {
        self.registry.get(id)
    }

    pub fn list_devices(&self) -> Result<Vec<Device>> {
        self.registry.list()
    }

    pub fn observations(&self) -> &Arc<ObservationSet> {
        &self.observations
    }

    pub fn cancel_observer(&self, id: u64) -> Result<()> {
        self.observations.cancel(id)
    }

    pub fn cancel_all_observers(&self) -> Result<()> {
        self.observations.cancel_all()
    }

    pub fn list_observers(&self) -> Result<Vec<Observation>> {
        self.observations.list()
    }
}

impl std::fmt::Debug for Lwm2mServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lwm2mServer")
            .field("server", &self.server)
            .field("observations", &self.observations)
            .finish_non_exhaustive()
    }
}
