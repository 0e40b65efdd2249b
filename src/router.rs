//! Request router
//!
//! A started router owns a transport listener and a worker thread that
//! feeds every inbound request through the route table. Routes are scanned
//! in order and the first one whose method, path pattern and condition all
//! match wins. The matching operation's handler pair then runs: the library
//! handler does the protocol work and calls the user handler last.
//!
//! ```ignore
//! let server = ServerInfo::start(&transport, 5684, client::routes(), client::handlers(objects))?;
//! server.set_handler(UserHandler::Write(Arc::new(|address, value| {
//!     log::info!("{address} is now {value}");
//!     Ok(())
//! })))?;
//! // ...
//! server.stop()?;
//! ```

use crate::address::Lwm2mAddress;
use crate::attributes::AttributeSet;
use crate::coap_types::{ContentFormat, Method, Request, Response, ResponseCode};
use crate::error::{Lwm2mError, Result};
use crate::registry::Device;
use crate::transport::{Listener, Transport};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

/// Every operation a router can dispatch to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
    Execute,
    WriteAttributes,
    Discover,
    Create,
    Delete,
    Registration,
    UpdateRegistration,
    Unregistration,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Execute => "execute",
            Self::WriteAttributes => "writeAttributes",
            Self::Discover => "discover",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Registration => "registration",
            Self::UpdateRegistration => "updateRegistration",
            Self::Unregistration => "unregistration",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// Any unsigned integer
    Integer,
}

/// Path matching rule of a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    /// Between `min` and `max` integer segments, e.g. `/3/0/1`
    Numeric(RangeInclusive<usize>),
    /// Exactly these segments
    Segments(Vec<Segment>),
}

impl PathPattern {
    /// Build a segment pattern from `"/rd/:id"` style text; `:name` matches an integer
    pub fn segments(template: &str) -> Self {
        Self::Segments(
            template
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if s.starts_with(':') {
                        Segment::Integer
                    } else {
                        Segment::Literal(s.to_string())
                    }
                })
                .collect(),
        )
    }

    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match self {
            Self::Numeric(depth) => {
                depth.contains(&parts.len()) && parts.iter().all(|p| is_integer(p))
            }
            Self::Segments(segments) => {
                segments.len() == parts.len()
                    && segments.iter().zip(&parts).all(|(segment, part)| match segment {
                        Segment::Literal(literal) => literal == part,
                        Segment::Integer => is_integer(part),
                    })
            }
        }
    }
}

fn is_integer(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())
}

/// Extra requirement a request must meet for a route to match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteCondition {
    #[default]
    Always,
    /// The request asks for application/link-format
    AcceptLinkFormat,
    /// The request has a non-empty query string
    HasQuery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    pub pattern: PathPattern,
    pub condition: RouteCondition,
    pub operation: Operation,
}

impl Route {
    pub fn new(method: Method, pattern: PathPattern, operation: Operation) -> Self {
        Self {
            method,
            pattern,
            condition: RouteCondition::Always,
            operation,
        }
    }

    pub fn when(mut self, condition: RouteCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn matches(&self, request: &Request) -> bool {
        if self.method != request.method || !self.pattern.matches(&request.path) {
            return false;
        }
        match self.condition {
            RouteCondition::Always => true,
            RouteCondition::AcceptLinkFormat => request.accept == Some(ContentFormat::LinkFormat),
            RouteCondition::HasQuery => request.query.as_deref().is_some_and(|q| !q.is_empty()),
        }
    }
}

pub type ValueHook = Arc<dyn Fn(&Lwm2mAddress, &str) -> Result<()> + Send + Sync>;
pub type ExecuteHook = Arc<dyn Fn(&Lwm2mAddress, Option<&str>) -> Result<()> + Send + Sync>;
pub type AttributesHook = Arc<dyn Fn(&Lwm2mAddress, &AttributeSet) -> Result<()> + Send + Sync>;
pub type AddressHook = Arc<dyn Fn(&Lwm2mAddress) -> Result<()> + Send + Sync>;
pub type DeviceHook = Arc<dyn Fn(&Device) -> Result<()> + Send + Sync>;

/// Application logic attached to one operation.
///
/// Each variant carries the data its operation exposes once the protocol
/// work is done. Returning an error turns the response into the error's
/// CoAP code.
#[derive(Clone)]
pub enum UserHandler {
    /// Address and the value about to be returned
    Read(ValueHook),
    /// Address and the value just stored
    Write(ValueHook),
    /// Address and the execute arguments, if any
    Execute(ExecuteHook),
    WriteAttributes(AttributesHook),
    Discover(AddressHook),
    Create(AddressHook),
    Delete(AddressHook),
    Registration(DeviceHook),
    UpdateRegistration(DeviceHook),
    Unregistration(DeviceHook),
}

impl UserHandler {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Read(_) => Operation::Read,
            Self::Write(_) => Operation::Write,
            Self::Execute(_) => Operation::Execute,
            Self::WriteAttributes(_) => Operation::WriteAttributes,
            Self::Discover(_) => Operation::Discover,
            Self::Create(_) => Operation::Create,
            Self::Delete(_) => Operation::Delete,
            Self::Registration(_) => Operation::Registration,
            Self::UpdateRegistration(_) => Operation::UpdateRegistration,
            Self::Unregistration(_) => Operation::Unregistration,
        }
    }

    /// Handler that just signals completion
    pub fn noop(operation: Operation) -> Self {
        match operation {
            Operation::Read => Self::Read(Arc::new(|_, _| Ok(()))),
            Operation::Write => Self::Write(Arc::new(|_, _| Ok(()))),
            Operation::Execute => Self::Execute(Arc::new(|_, _| Ok(()))),
            Operation::WriteAttributes => Self::WriteAttributes(Arc::new(|_, _| Ok(()))),
            Operation::Discover => Self::Discover(Arc::new(|_| Ok(()))),
            Operation::Create => Self::Create(Arc::new(|_| Ok(()))),
            Operation::Delete => Self::Delete(Arc::new(|_| Ok(()))),
            Operation::Registration => Self::Registration(Arc::new(|_| Ok(()))),
            Operation::UpdateRegistration => Self::UpdateRegistration(Arc::new(|_| Ok(()))),
            Operation::Unregistration => Self::Unregistration(Arc::new(|_| Ok(()))),
        }
    }

    /// Call a value hook (read, write)
    pub fn on_value(&self, address: &Lwm2mAddress, value: &str) -> Result<()> {
        match self {
            Self::Read(hook) | Self::Write(hook) => hook(address, value),
            other => Err(mismatch(other)),
        }
    }

    pub fn on_execute(&self, address: &Lwm2mAddress, arguments: Option<&str>) -> Result<()> {
        match self {
            Self::Execute(hook) => hook(address, arguments),
            other => Err(mismatch(other)),
        }
    }

    pub fn on_attributes(&self, address: &Lwm2mAddress, attributes: &AttributeSet) -> Result<()> {
        match self {
            Self::WriteAttributes(hook) => hook(address, attributes),
            other => Err(mismatch(other)),
        }
    }

    /// Call an address hook (discover, create, delete)
    pub fn on_address(&self, address: &Lwm2mAddress) -> Result<()> {
        match self {
            Self::Discover(hook) | Self::Create(hook) | Self::Delete(hook) => hook(address),
            other => Err(mismatch(other)),
        }
    }

    /// Call a device hook (registration, update, unregistration)
    pub fn on_device(&self, device: &Device) -> Result<()> {
        match self {
            Self::Registration(hook)
            | Self::UpdateRegistration(hook)
            | Self::Unregistration(hook) => hook(device),
            other => Err(mismatch(other)),
        }
    }
}

fn mismatch(handler: &UserHandler) -> Lwm2mError {
    Lwm2mError::Router(format!(
        "user handler for {} called with the wrong data",
        handler.operation()
    ))
}

impl std::fmt::Debug for UserHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserHandler({})", self.operation())
    }
}

/// Protocol-level behaviour of an operation
pub type LibraryHandler = Arc<dyn Fn(&Request, &UserHandler) -> Response + Send + Sync>;

#[derive(Clone)]
pub struct HandlerPair {
    pub library: LibraryHandler,
    pub user: UserHandler,
}

impl HandlerPair {
    pub fn invoke(&self, request: &Request) -> Response {
        (self.library)(request, &self.user)
    }
}

/// Handler pairs indexed by operation
#[derive(Clone, Default)]
pub struct HandlerTable {
    pairs: HashMap<Operation, HandlerPair>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the library handler of an operation with a no-op user handler
    pub fn insert(
        &mut self,
        operation: Operation,
        library: impl Fn(&Request, &UserHandler) -> Response + Send + Sync + 'static,
    ) -> &mut Self {
        self.pairs.insert(
            operation,
            HandlerPair {
                library: Arc::new(library),
                user: UserHandler::noop(operation),
            },
        );
        self
    }

    /// Replace the user side of an existing slot
    pub fn set_user(&mut self, handler: UserHandler) -> Result<()> {
        let operation = handler.operation();
        let pair = self
            .pairs
            .get_mut(&operation)
            .ok_or(Lwm2mError::MissingHandler(operation.name()))?;
        pair.user = handler;
        Ok(())
    }

    pub fn get(&self, operation: Operation) -> Option<&HandlerPair> {
        self.pairs.get(&operation)
    }

    pub fn contains(&self, operation: Operation) -> bool {
        self.pairs.contains_key(&operation)
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.pairs.keys()).finish()
    }
}

#[derive(Clone)]
struct Dispatcher {
    routes: Arc<Vec<Route>>,
    handlers: Arc<RwLock<HandlerTable>>,
}

impl Dispatcher {
    fn dispatch(&self, request: &Request) -> Response {
        let Some(route) = self.routes.iter().find(|route| route.matches(request)) else {
            log::debug!("{} {} → no route", request.method, request.path);
            return Response::not_found();
        };

        // Clone the pair so the lock is not held while user code runs
        let pair = match self.handlers.read() {
            Ok(table) => table
                .get(route.operation)
                .cloned()
                .ok_or(Lwm2mError::MissingHandler(route.operation.name())),
            Err(_) => Err(Lwm2mError::Router("handler table lock poisoned".into())),
        };
        let pair = match pair {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("{} {}: {}", request.method, request.path, e);
                return Response::error(ResponseCode::InternalServerError, &e.to_string());
            }
        };

        let response = pair.invoke(request);
        log::debug!(
            "{} {} → {} ({})",
            request.method,
            request.path,
            route.operation,
            response.code
        );
        response
    }
}

/// A running protocol endpoint
pub struct ServerInfo {
    dispatcher: Dispatcher,
    port: u16,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<()>>>,
}

impl ServerInfo {
    /// Bind `port` on the transport and start serving `routes`.
    ///
    /// Every operation named by a route needs a handler pair in `handlers`.
    pub fn start(
        transport: &dyn Transport,
        port: u16,
        routes: Vec<Route>,
        handlers: HandlerTable,
    ) -> Result<Self> {
        if let Some(route) = routes.iter().find(|r| !handlers.contains(r.operation)) {
            return Err(Lwm2mError::MissingHandler(route.operation.name()));
        }

        let listener = transport.listen(port)?;
        let port = listener.local_port();
        let dispatcher = Dispatcher {
            routes: Arc::new(routes),
            handlers: Arc::new(RwLock::new(handlers)),
        };
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let dispatcher = dispatcher.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name(format!("lwm2m-router-{port}"))
                .spawn(move || serve(listener, dispatcher, running))?
        };

        log::info!("Router listening on port {}", port);
        Ok(Self {
            dispatcher,
            port,
            running,
            worker: Some(worker),
        })
    }

    /// Stop serving and release the listener
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    /// Replace the user handler of one operation
    pub fn set_handler(&self, handler: UserHandler) -> Result<()> {
        self.dispatcher
            .handlers
            .write()
            .map_err(|_| Lwm2mError::Router("handler table lock poisoned".into()))?
            .set_user(handler)
    }

    /// Dispatch a request without going through the listener
    pub fn handle(&self, request: &Request) -> Response {
        self.dispatcher.dispatch(request)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn routes(&self) -> &[Route] {
        &self.dispatcher.routes
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.running.store(false, Ordering::SeqCst);
        let result = worker
            .join()
            .map_err(|_| Lwm2mError::Router("router thread panicked".into()))?;
        log::info!("Router on port {} stopped", self.port);
        result
    }
}

impl Drop for ServerInfo {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Router on port {} did not stop cleanly: {}", self.port, e);
        }
    }
}

impl std::fmt::Debug for ServerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInfo")
            .field("port", &self.port)
            .field("routes", &self.dispatcher.routes.len())
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

fn serve(
    mut listener: Box<dyn Listener>,
    dispatcher: Dispatcher,
    running: Arc<AtomicBool>,
) -> Result<()> {
    while running.load(Ordering::SeqCst) {
        let inbound = match listener.recv() {
            Ok(Some(inbound)) => inbound,
            Ok(None) => continue,
            Err(e) => {
                log::error!("Listener failed: {}", e);
                listener.close()?;
                return Err(e);
            }
        };

        let response = dispatcher.dispatch(&inbound.request);
        if let Err(e) = listener.respond(&inbound, &response) {
            log::warn!("Could not answer {}: {}", inbound.peer, e);
        }
    }
    listener.close()
}
