//! Device management operations
//!
//! Server-side helpers that turn LWM2M operations into CoAP requests
//! against a registered device and interpret the answer. Every operation
//! follows the same pipeline: resolve the device id through the registry,
//! build the request, send it, then map the response code. Each operation
//! has exactly one success code; anything else is a typed failure carrying
//! the received code.
//!
//! # Example
//! ```ignore
//! let management = DeviceManagement::new(transport, registry);
//! let manufacturer = management.read(device_id, 3, 0, 0)?;
//! management.write(device_id, 1, 0, 1, "300")?;
//! ```

use crate::address::Lwm2mAddress;
use crate::attributes::AttributeSet;
use crate::coap_types::{ContentFormat, Method, Request, Response, ResponseCode};
use crate::error::{Lwm2mError, Result};
use crate::registry::{DeviceId, DeviceRegistry};
use crate::transport::Transport;
use std::sync::Arc;

/// Issues LWM2M operations against registered devices
#[derive(Clone)]
pub struct DeviceManagement {
    transport: Arc<dyn Transport>,
    registry: Arc<dyn DeviceRegistry>,
}

impl DeviceManagement {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<dyn DeviceRegistry>) -> Self {
        Self {
            transport,
            registry,
        }
    }

    /// Resolve the device and send it `request`
    fn send(&self, device_id: DeviceId, request: &Request) -> Result<Response> {
        let device = self.registry.get(device_id)?;
        log::debug!(
            "{} {} to device {} ({})",
            request.method,
            request.path,
            device_id,
            device.endpoint()
        );
        self.transport.send(&device.endpoint(), request)
    }

    /// Read a resource value (GET, expects 2.05)
    pub fn read(
        &self,
        device_id: DeviceId,
        object_type: u16,
        object_id: u16,
        resource_id: u16,
    ) -> Result<String> {
        let address = Lwm2mAddress::resource(object_type, object_id, resource_id);
        let request = Request::new(Method::Get, address.path());
        let response = self.send(device_id, &request)?;
        expect(&response, ResponseCode::Content)?;
        Ok(response.payload_text())
    }

    /// Write a resource value (PUT, expects 2.04)
    pub fn write(
        &self,
        device_id: DeviceId,
        object_type: u16,
        object_id: u16,
        resource_id: u16,
        value: &str,
    ) -> Result<()> {
        let address = Lwm2mAddress::resource(object_type, object_id, resource_id);
        let request = Request::new(Method::Put, address.path())
            .with_payload(value.as_bytes(), ContentFormat::TextPlain);
        let response = self.send(device_id, &request)?;
        expect_changed(&response, &address)
    }

    /// Execute a resource.
    ///
    /// Not sent to the device yet: the call is accepted and reported as
    /// successful so callers can treat every operation alike.
    pub fn execute(
        &self,
        device_id: DeviceId,
        object_type: u16,
        object_id: u16,
        resource_id: u16,
        arguments: Option<&str>,
    ) -> Result<()> {
        log::debug!(
            "execute {} on device {} ({:?}) accepted without a request",
            Lwm2mAddress::resource(object_type, object_id, resource_id),
            device_id,
            arguments
        );
        Ok(())
    }

    /// Set notification attributes (PUT with query, expects 2.04).
    ///
    /// Unsupported attribute names fail before anything is sent.
    pub fn write_attributes(
        &self,
        device_id: DeviceId,
        address: &Lwm2mAddress,
        attributes: &AttributeSet,
    ) -> Result<()> {
        let query = attributes.to_query()?;
        let request = Request::new(Method::Put, address.path()).with_query(query);
        let response = self.send(device_id, &request)?;
        expect_changed(&response, address)
    }

    /// Discover the resources of an object type
    pub fn discover_object(&self, device_id: DeviceId, object_type: u16) -> Result<String> {
        self.discover(device_id, &Lwm2mAddress::object(object_type))
    }

    /// Discover the resources of one instance
    pub fn discover_instance(
        &self,
        device_id: DeviceId,
        object_type: u16,
        object_id: u16,
    ) -> Result<String> {
        self.discover(device_id, &Lwm2mAddress::instance(object_type, object_id))
    }

    /// Discover the attributes of one resource
    pub fn discover_resource(
        &self,
        device_id: DeviceId,
        object_type: u16,
        object_id: u16,
        resource_id: u16,
    ) -> Result<String> {
        self.discover(
            device_id,
            &Lwm2mAddress::resource(object_type, object_id, resource_id),
        )
    }

    /// GET with Accept: link-format, expects 2.05 and returns the raw body
    fn discover(&self, device_id: DeviceId, address: &Lwm2mAddress) -> Result<String> {
        let request =
            Request::new(Method::Get, address.path()).with_accept(ContentFormat::LinkFormat);
        let response = self.send(device_id, &request)?;
        expect(&response, ResponseCode::Content)?;
        Ok(response.payload_text())
    }

    /// Create an object instance (POST, expects 2.01)
    pub fn create(&self, device_id: DeviceId, object_type: u16, object_id: u16) -> Result<()> {
        let address = Lwm2mAddress::instance(object_type, object_id);
        let request = Request::new(Method::Post, address.path());
        let response = self.send(device_id, &request)?;
        expect(&response, ResponseCode::Created)
    }

    /// Delete an object instance.
    ///
    /// Like [`execute`](Self::execute), accepted without contacting the device.
    pub fn remove(&self, device_id: DeviceId, object_type: u16, object_id: u16) -> Result<()> {
        log::debug!(
            "remove {} on device {} accepted without a request",
            Lwm2mAddress::instance(object_type, object_id),
            device_id
        );
        Ok(())
    }
}

impl std::fmt::Debug for DeviceManagement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManagement").finish_non_exhaustive()
    }
}

fn expect(response: &Response, success: ResponseCode) -> Result<()> {
    if response.code == success {
        Ok(())
    } else {
        Err(Lwm2mError::ClientError(response.code))
    }
}

/// 2.04, with 4.04 reported as a missing object
fn expect_changed(response: &Response, address: &Lwm2mAddress) -> Result<()> {
    match response.code {
        ResponseCode::Changed => Ok(()),
        ResponseCode::NotFound => Err(Lwm2mError::ObjectNotFound(address.path())),
        code => Err(Lwm2mError::ClientError(code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryRegistry, Registration};
    use crate::transport::{Endpoint, Listener, TransportEvent};
    use std::sync::Mutex;

    /// Answers every request with a canned response and records what was sent
    struct StubTransport {
        reply: Response,
        sent: Mutex<Vec<(Endpoint, Request)>>,
    }

    impl StubTransport {
        fn new(reply: Response) -> Arc<Self> {
            Arc::new(Self {
                reply,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(Endpoint, Request)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for StubTransport {
        fn request(
            &self,
            endpoint: &Endpoint,
            request: &Request,
            on_event: &mut dyn FnMut(TransportEvent),
        ) {
            self.sent
                .lock()
                .unwrap()
                .push((endpoint.clone(), request.clone()));
            on_event(TransportEvent::Response(self.reply.clone()));
        }

        fn listen(&self, _: u16) -> Result<Box<dyn Listener>> {
            Err(Lwm2mError::Transport("stub cannot listen".into()))
        }
    }

    fn reply(code: &str, payload: &str) -> Response {
        Response {
            code: ResponseCode::parse(code).unwrap(),
            payload: payload.as_bytes().to_vec(),
            content_format: None,
            location_path: Vec::new(),
        }
    }

    /// Registry holding one device at 10.0.0.5
    fn registry() -> (Arc<MemoryRegistry>, DeviceId) {
        let registry = Arc::new(MemoryRegistry::new());
        let device = registry
            .register(Registration {
                name: "weather-station".to_string(),
                lifetime: 86400,
                version: "1.0".to_string(),
                binding: "U".to_string(),
                address: "10.0.0.5".to_string(),
                port: 5684,
                links: vec!["/3/0".to_string()],
            })
            .unwrap();
        (registry, device.id)
    }

    fn setup(reply: Response) -> (DeviceManagement, Arc<StubTransport>, DeviceId) {
        let transport = StubTransport::new(reply);
        let (registry, id) = registry();
        (
            DeviceManagement::new(transport.clone(), registry),
            transport,
            id,
        )
    }

    #[test]
    fn test_read_success() {
        let (management, transport, id) = setup(reply("2.05", "20"));

        assert_eq!(management.read(id, 3, 0, 1).unwrap(), "20");

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Endpoint::new("10.0.0.5", 5684));
        assert_eq!(sent[0].1.method, Method::Get);
        assert_eq!(sent[0].1.path, "/3/0/1");
    }

    #[test]
    fn test_read_not_found_is_a_generic_client_error() {
        let (management, _, id) = setup(reply("4.04", ""));

        match management.read(id, 3, 0, 1) {
            Err(Lwm2mError::ClientError(code)) => assert_eq!(code.to_string(), "4.04"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_write_maps_not_found_to_object_not_found() {
        let (management, transport, id) = setup(reply("4.04", ""));

        match management.write(id, 3, 0, 1, "x") {
            Err(Lwm2mError::ObjectNotFound(path)) => assert_eq!(path, "/3/0/1"),
            other => panic!("unexpected result: {other:?}"),
        }
        let sent = transport.sent();
        assert_eq!(sent[0].1.method, Method::Put);
        assert_eq!(sent[0].1.payload_text(), "x");
    }

    #[test]
    fn test_write_other_failures_keep_the_code() {
        let (management, _, id) = setup(reply("4.05", ""));
        assert!(matches!(
            management.write(id, 3, 0, 1, "x"),
            Err(Lwm2mError::ClientError(ResponseCode::MethodNotAllowed))
        ));

        let (management, _, id) = setup(reply("2.04", ""));
        assert!(management.write(id, 3, 0, 1, "x").is_ok());
    }

    #[test]
    fn test_unknown_device_fails_lookup_without_sending() {
        let (management, transport, _) = setup(reply("2.05", "20"));

        assert!(matches!(
            management.read(999, 3, 0, 1),
            Err(Lwm2mError::RegistryLookupFailed(999))
        ));
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_discover_object_requests_link_format() {
        let body = "</3/0>,</3/0/1>,</3/0/2>";
        let (management, transport, id) = setup(reply("2.05", body));

        assert_eq!(management.discover_object(id, 3).unwrap(), body);

        let sent = transport.sent();
        assert_eq!(sent[0].1.method, Method::Get);
        assert_eq!(sent[0].1.path, "/3");
        assert_eq!(sent[0].1.accept, Some(ContentFormat::LinkFormat));
    }

    #[test]
    fn test_discover_depths() {
        let (management, transport, id) = setup(reply("2.05", "</3/0/1>"));

        management.discover_instance(id, 3, 0).unwrap();
        management.discover_resource(id, 3, 0, 1).unwrap();

        let paths: Vec<String> = transport.sent().into_iter().map(|(_, r)| r.path).collect();
        assert_eq!(paths, vec!["/3/0", "/3/0/1"]);

        let (management, _, id) = setup(reply("4.04", ""));
        assert!(matches!(
            management.discover_object(id, 3),
            Err(Lwm2mError::ClientError(ResponseCode::NotFound))
        ));
    }

    #[test]
    fn test_write_attributes_builds_query() {
        let (management, transport, id) = setup(reply("2.04", ""));
        let attributes: AttributeSet = [("pmin", "1"), ("pmax", "60")].into_iter().collect();

        management
            .write_attributes(id, &Lwm2mAddress::instance(3, 0), &attributes)
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent[0].1.method, Method::Put);
        assert_eq!(sent[0].1.path, "/3/0");
        let query = sent[0].1.query.clone().unwrap();
        assert!(query.contains("pmin=1&"));
        assert!(query.contains("pmax=60&"));
    }

    #[test]
    fn test_write_attributes_rejects_before_sending() {
        let (management, transport, id) = setup(reply("2.04", ""));
        let attributes: AttributeSet = [("pmin", "1"), ("zzz", "2"), ("aaa", "3")]
            .into_iter()
            .collect();

        match management.write_attributes(id, &Lwm2mAddress::object(3), &attributes) {
            Err(Lwm2mError::UnsupportedAttributes(names)) => {
                assert_eq!(names, vec!["aaa".to_string(), "zzz".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_create_expects_created() {
        let (management, transport, id) = setup(reply("2.01", ""));
        management.create(id, 3303, 1).unwrap();
        assert_eq!(transport.sent()[0].1.method, Method::Post);
        assert_eq!(transport.sent()[0].1.path, "/3303/1");

        let (management, _, id) = setup(reply("4.00", ""));
        assert!(matches!(
            management.create(id, 3303, 1),
            Err(Lwm2mError::ClientError(ResponseCode::BadRequest))
        ));
    }

    #[test]
    fn test_execute_and_remove_succeed_without_requests() {
        let (management, transport, id) = setup(reply("5.00", ""));
        management.execute(id, 3, 0, 4, None).unwrap();
        management.remove(id, 3, 0).unwrap();
        assert!(transport.sent().is_empty());
    }
}
