//! Client registration lifecycle
//!
//! A device goes Idle → Listening → Registering → Registered, may update
//! its registration any number of times, and finally unregisters, which
//! stops its local router. [`Lwm2mClient::register`] starts the local router
//! first so the server can reach the device as soon as it is registered;
//! every failing exit path releases that router again.

use crate::client;
use crate::coap_types::{ContentFormat, Method, Request, ResponseCode, query_pair};
use crate::config::ClientConfig;
use crate::error::{Lwm2mError, Result};
use crate::links::format_links;
use crate::objects::ObjectRegistry;
use crate::router::{ServerInfo, UserHandler};
use crate::transport::{Endpoint, Transport};
use std::sync::Arc;

/// A live registration with an LWM2M server
#[derive(Debug)]
pub struct DeviceInformation {
    pub host: String,
    pub port: u16,
    /// Registration resource assigned by the server, e.g. `/rd/5`
    pub location: String,
    server: ServerInfo,
}

impl DeviceInformation {
    /// The device's own router
    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    /// Install application logic for a server-initiated operation
    pub fn set_handler(&self, handler: UserHandler) -> Result<()> {
        self.server.set_handler(handler)
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

/// Device-side LWM2M client
#[derive(Clone)]
pub struct Lwm2mClient {
    transport: Arc<dyn Transport>,
    objects: Arc<dyn ObjectRegistry>,
    config: ClientConfig,
}

impl Lwm2mClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        objects: Arc<dyn ObjectRegistry>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            objects,
            config,
        }
    }

    pub fn objects(&self) -> &Arc<dyn ObjectRegistry> {
        &self.objects
    }

    /// Link-format listing of every object instance
    fn payload(&self) -> Result<String> {
        Ok(format_links(&self.objects.object_uris()?))
    }

    fn query(&self, endpoint_name: Option<&str>) -> Result<String> {
        let mut query = Vec::new();
        if let Some(name) = endpoint_name {
            query.push(query_pair("ep", name)?);
        }
        query.push(query_pair("lt", &self.config.lifetime.to_string())?);
        query.push(query_pair("lwm2m", &self.config.version)?);
        query.push(query_pair("b", &self.config.binding)?);
        Ok(query.join("&"))
    }

    /// Register with the server at `host:port`.
    ///
    /// `url` is the path prefix of the server's registration interface; the
    /// request goes to `<url>/rd`.
    pub fn register(
        &self,
        host: &str,
        port: u16,
        url: &str,
        endpoint_name: &str,
    ) -> Result<DeviceInformation> {
        let server = ServerInfo::start(
            self.transport.as_ref(),
            self.config.port,
            client::routes(),
            client::handlers(self.objects.clone()),
        )?;

        let result = self.send_registration(host, port, url, endpoint_name);
        match result {
            Ok(location) => {
                log::info!("Registered {} at {}:{}{}", endpoint_name, host, port, location);
                Ok(DeviceInformation {
                    host: host.to_string(),
                    port,
                    location,
                    server,
                })
            }
            Err(e) => {
                if let Err(stop_error) = server.stop() {
                    log::warn!("Local router did not stop cleanly: {}", stop_error);
                }
                Err(e)
            }
        }
    }

    fn send_registration(
        &self,
        host: &str,
        port: u16,
        url: &str,
        endpoint_name: &str,
    ) -> Result<String> {
        let path = format!("{}/rd", url.trim_end_matches('/'));
        let request = Request::new(Method::Post, path)
            .with_query(self.query(Some(endpoint_name))?)
            .with_payload(self.payload()?, ContentFormat::LinkFormat);

        let endpoint = Endpoint::new(host, port);
        let response = self.transport.send(&endpoint, &request).map_err(|e| {
            log::error!("Registration request to {} failed: {}", endpoint, e);
            Lwm2mError::ServerNotFound(endpoint.to_string())
        })?;

        if response.code != ResponseCode::Created {
            return Err(Lwm2mError::RegistrationFailed(response.code));
        }
        // Without a location there is nothing to update or delete later
        if response.location_path.is_empty() {
            log::error!("Registration at {} returned no Location-Path", endpoint);
            return Err(Lwm2mError::RegistrationFailed(response.code));
        }
        Ok(response.location())
    }

    /// Refresh the registration with the current object listing.
    ///
    /// The server's answer is not checked: any response keeps the
    /// registration valid. Only a transport failure is an error.
    pub fn update(&self, device: &DeviceInformation) -> Result<()> {
        let request = Request::new(Method::Put, device.location.clone())
            .with_query(self.query(None)?)
            .with_payload(self.payload()?, ContentFormat::LinkFormat);

        let response = self.transport.send(&device.endpoint(), &request)?;
        if response.code != ResponseCode::Changed {
            log::warn!(
                "Update of {} answered with {}; keeping registration",
                device.location,
                response.code
            );
        }
        Ok(())
    }

    /// Remove the registration and stop the local router
    pub fn unregister(&self, device: DeviceInformation) -> Result<()> {
        let request = Request::new(Method::Delete, device.location.clone());
        let sent = self.transport.send(&device.endpoint(), &request);
        let location = device.location.clone();

        let stopped = device.server.stop();
        match sent {
            Ok(response) => {
                log::info!("Unregistered {} ({})", location, response.code);
                stopped
            }
            Err(e) => {
                if let Err(stop_error) = stopped {
                    log::warn!("Local router did not stop cleanly: {}", stop_error);
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Lwm2mClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lwm2mClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
