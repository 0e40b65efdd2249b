//! Transport seam
//!
//! The protocol engine never touches sockets. It talks to a [`Transport`]
//! that can send one request to a remote endpoint and open listeners for
//! inbound requests. [`crate::udp::UdpTransport`] is the CoAP/UDP
//! implementation; tests plug in in-memory ones.

use crate::coap_types::{Request, Response};
use crate::error::{Lwm2mError, Result};
use std::net::SocketAddr;
use std::sync::Arc;

/// Network location of a remote CoAP endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Something the transport reports about an in-flight request
#[derive(Debug)]
pub enum TransportEvent {
    Response(Response),
    Error(Lwm2mError),
}

/// One inbound exchange waiting for its response
#[derive(Debug, Clone)]
pub struct Inbound {
    pub request: Request,
    pub peer: SocketAddr,
    pub message_id: u16,
    pub token: Vec<u8>,
    /// The peer expects a piggy-backed acknowledgement
    pub confirmable: bool,
}

/// A bound server socket delivering inbound requests
pub trait Listener: Send {
    /// Wait for the next request. `Ok(None)` means the poll interval elapsed
    /// without traffic, so the caller can check for shutdown.
    fn recv(&mut self) -> Result<Option<Inbound>>;

    /// Answer a previously received exchange
    fn respond(&mut self, inbound: &Inbound, response: &Response) -> Result<()>;

    /// Port the listener is bound to
    fn local_port(&self) -> u16;

    /// Release the underlying socket
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait Transport: Send + Sync {
    /// Send `request` to `endpoint`, reporting what happens through `on_event`.
    ///
    /// Implementations may report more than one event for a single request
    /// (e.g. an error per failed retransmission).
    fn request(
        &self,
        endpoint: &Endpoint,
        request: &Request,
        on_event: &mut dyn FnMut(TransportEvent),
    );

    /// Bind a listener on `port`
    fn listen(&self, port: u16) -> Result<Box<dyn Listener>>;

    /// Send a request and wait for its outcome.
    ///
    /// Only the first event counts; anything reported after it is dropped.
    fn send(&self, endpoint: &Endpoint, request: &Request) -> Result<Response> {
        let mut outcome: Option<TransportEvent> = None;
        self.request(endpoint, request, &mut |event| {
            if outcome.is_some() {
                log::warn!(
                    "Dropping duplicate transport event for {} {}: {:?}",
                    request.method,
                    request.path,
                    event
                );
                return;
            }
            outcome = Some(event);
        });

        match outcome {
            Some(TransportEvent::Response(response)) => Ok(response),
            Some(TransportEvent::Error(e)) => Err(e),
            None => Err(Lwm2mError::Transport(format!(
                "no outcome reported for {} {}",
                request.method, request.path
            ))),
        }
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn request(
        &self,
        endpoint: &Endpoint,
        request: &Request,
        on_event: &mut dyn FnMut(TransportEvent),
    ) {
        (**self).request(endpoint, request, on_event)
    }

    fn listen(&self, port: u16) -> Result<Box<dyn Listener>> {
        (**self).listen(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coap_types::Method;

    struct Chatty;

    impl Transport for Chatty {
        fn request(&self, _: &Endpoint, _: &Request, on_event: &mut dyn FnMut(TransportEvent)) {
            on_event(TransportEvent::Error(Lwm2mError::Transport("first".into())));
            on_event(TransportEvent::Error(Lwm2mError::Transport("second".into())));
            on_event(TransportEvent::Response(Response::changed()));
        }

        fn listen(&self, _: u16) -> Result<Box<dyn Listener>> {
            Err(Lwm2mError::Transport("not supported".into()))
        }
    }

    struct Silent;

    impl Transport for Silent {
        fn request(&self, _: &Endpoint, _: &Request, _: &mut dyn FnMut(TransportEvent)) {}

        fn listen(&self, _: u16) -> Result<Box<dyn Listener>> {
            Err(Lwm2mError::Transport("not supported".into()))
        }
    }

    #[test]
    fn test_send_keeps_first_event() {
        let request = Request::new(Method::Get, "/3/0/1");
        match Chatty.send(&Endpoint::new("localhost", 5683), &request) {
            Err(Lwm2mError::Transport(msg)) => assert_eq!(msg, "first"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_send_without_events_is_an_error() {
        let request = Request::new(Method::Get, "/3/0/1");
        assert!(Silent.send(&Endpoint::new("localhost", 5683), &request).is_err());
    }

    #[test]
    fn test_arc_forwards() {
        let transport = Arc::new(Chatty);
        let request = Request::new(Method::Put, "/1/0/1");
        assert!(transport.send(&Endpoint::new("h", 1), &request).is_err());
    }

    #[test]
    fn test_endpoint_display() {
        let endpoint: Endpoint = "10.0.0.5:5683".parse::<SocketAddr>().unwrap().into();
        assert_eq!(endpoint.to_string(), "10.0.0.5:5683");
    }
}
