//! CoAP over UDP transport
//!
//! Packet encoding is delegated to `coap-lite`; this module only maps between
//! its `Packet` and the engine's [`Request`]/[`Response`] and runs the
//! sockets. Every outbound request is confirmable and expects a piggy-backed
//! response. Retransmission is not attempted: a receive timeout is reported
//! as a transport error.
//!
//! Once a transport listens, its requests leave from the listening socket so
//! the peer sees the address it can reach the endpoint on. Their responses
//! arrive on that socket too and are handed over by the listener's poll loop,
//! so such requests must not be issued from the router thread itself.

use crate::coap_types::{ContentFormat, Method, Request, Response, ResponseCode};
use crate::config::ServerConfig;
use crate::error::{Lwm2mError, Result};
use crate::transport::{Endpoint, Inbound, Listener, Transport, TransportEvent};
use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, mpsc};
use std::time::Duration;

const MAX_DATAGRAM: usize = 1500;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A listening socket plus the outbound exchanges waiting on it, by token
#[derive(Debug)]
struct SharedSocket {
    socket: UdpSocket,
    pending: Mutex<HashMap<Vec<u8>, mpsc::Sender<Packet>>>,
}

impl SharedSocket {
    fn pending(&self) -> Result<MutexGuard<'_, HashMap<Vec<u8>, mpsc::Sender<Packet>>>> {
        self.pending
            .lock()
            .map_err(|_| Lwm2mError::Transport("pending exchange table lock poisoned".into()))
    }

    /// Hand a response to the exchange waiting for its token
    fn deliver(&self, packet: Packet, peer: SocketAddr) -> Result<()> {
        match self.pending()?.remove(packet.get_token()) {
            Some(waiting) => {
                // The exchange may have timed out in the meantime
                let _ = waiting.send(packet);
            }
            None => log::debug!("Dropping unmatched response from {peer}"),
        }
        Ok(())
    }
}

type SocketSlot = Arc<Mutex<Option<Arc<SharedSocket>>>>;

/// UDP transport speaking CoAP
#[derive(Debug)]
pub struct UdpTransport {
    timeout: Duration,
    next_message_id: AtomicU16,
    bound: SocketSlot,
}

impl UdpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            next_message_id: AtomicU16::new(1),
            bound: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.timeout())
    }

    fn bound_socket(&self) -> Option<Arc<SharedSocket>> {
        self.bound.lock().ok().and_then(|bound| bound.clone())
    }

    fn timed_out(&self, endpoint: &Endpoint) -> Lwm2mError {
        Lwm2mError::Transport(format!(
            "no response from {endpoint} within {:?}",
            self.timeout
        ))
    }

    fn exchange(&self, endpoint: &Endpoint, request: &Request) -> Result<Response> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let token = message_id.to_be_bytes().to_vec();
        let packet = request_to_packet(request, message_id, &token);
        let bytes = packet
            .to_bytes()
            .map_err(|e| Lwm2mError::Transport(e.to_string()))?;

        match self.bound_socket() {
            Some(shared) => self.exchange_shared(&shared, endpoint, &bytes, token),
            None => self.exchange_ephemeral(endpoint, &bytes, &token),
        }
    }

    /// Send from the listening socket and wait for the listener to deliver the reply
    fn exchange_shared(
        &self,
        shared: &SharedSocket,
        endpoint: &Endpoint,
        bytes: &[u8],
        token: Vec<u8>,
    ) -> Result<Response> {
        let (tx, rx) = mpsc::channel();
        shared.pending()?.insert(token.clone(), tx);

        let outcome = match shared
            .socket
            .send_to(bytes, (endpoint.host.as_str(), endpoint.port))
        {
            Ok(_) => rx
                .recv_timeout(self.timeout)
                .map(|reply| packet_to_response(&reply))
                .map_err(|_| self.timed_out(endpoint)),
            Err(e) => Err(e.into()),
        };

        shared.pending()?.remove(&token);
        outcome
    }

    /// Send from a throwaway socket; used before anything listens
    fn exchange_ephemeral(
        &self,
        endpoint: &Endpoint,
        bytes: &[u8],
        token: &[u8],
    ) -> Result<Response> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.send_to(bytes, (endpoint.host.as_str(), endpoint.port))?;

        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let len = match socket.recv_from(&mut buf) {
                Ok((len, _)) => len,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Err(self.timed_out(endpoint));
                }
                Err(e) => return Err(e.into()),
            };

            let reply = match Packet::from_bytes(&buf[..len]) {
                Ok(reply) => reply,
                Err(e) => {
                    log::warn!("Ignoring undecodable datagram from {endpoint}: {e:?}");
                    continue;
                }
            };

            // Stray traffic for an earlier exchange
            if reply.get_token() != token {
                continue;
            }

            if let MessageClass::Response(_) = reply.header.code {
                return Ok(packet_to_response(&reply));
            }
        }
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl Transport for UdpTransport {
    fn request(
        &self,
        endpoint: &Endpoint,
        request: &Request,
        on_event: &mut dyn FnMut(TransportEvent),
    ) {
        log::debug!("→ {} coap://{}{}", request.method, endpoint, request.path);
        match self.exchange(endpoint, request) {
            Ok(response) => {
                log::debug!("← {} from {}", response.code, endpoint);
                on_event(TransportEvent::Response(response));
            }
            Err(e) => on_event(TransportEvent::Error(e)),
        }
    }

    fn listen(&self, port: u16) -> Result<Box<dyn Listener>> {
        let mut listener = UdpListener::bind(port)?;
        *self
            .bound
            .lock()
            .map_err(|_| Lwm2mError::Transport("socket slot lock poisoned".into()))? =
            Some(listener.shared.clone());
        listener.slot = Some(self.bound.clone());
        Ok(Box::new(listener))
    }
}

/// Server socket answering CoAP requests
#[derive(Debug)]
pub struct UdpListener {
    shared: Arc<SharedSocket>,
    /// Transport slot to clear on close, when bound through a transport
    slot: Option<SocketSlot>,
}

impl UdpListener {
    pub fn bind(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        Ok(Self {
            shared: Arc::new(SharedSocket {
                socket,
                pending: Mutex::new(HashMap::new()),
            }),
            slot: None,
        })
    }
}

impl Listener for UdpListener {
    fn recv(&mut self) -> Result<Option<Inbound>> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, peer) = match self.shared.socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let packet = match Packet::from_bytes(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("Ignoring undecodable datagram from {peer}: {e:?}");
                return Ok(None);
            }
        };

        if let MessageClass::Response(_) = packet.header.code {
            self.shared.deliver(packet, peer)?;
            return Ok(None);
        }
        Ok(packet_to_inbound(&packet, peer))
    }

    fn respond(&mut self, inbound: &Inbound, response: &Response) -> Result<()> {
        let packet = response_to_packet(response, inbound);
        let bytes = packet
            .to_bytes()
            .map_err(|e| Lwm2mError::Transport(e.to_string()))?;
        self.shared.socket.send_to(&bytes, inbound.peer)?;
        Ok(())
    }

    fn local_port(&self) -> u16 {
        self.shared.socket.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    fn close(&mut self) -> Result<()> {
        let Some(slot) = self.slot.take() else {
            return Ok(());
        };
        let mut bound = slot
            .lock()
            .map_err(|_| Lwm2mError::Transport("socket slot lock poisoned".into()))?;
        if bound
            .as_ref()
            .is_some_and(|shared| Arc::ptr_eq(shared, &self.shared))
        {
            *bound = None;
        }
        Ok(())
    }
}

fn encode_uint(value: u16) -> Vec<u8> {
    match value {
        0 => Vec::new(),
        1..=0xff => vec![value as u8],
        _ => value.to_be_bytes().to_vec(),
    }
}

fn decode_uint(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .take(2)
        .fold(0u16, |acc, b| (acc << 8) | u16::from(*b))
}

fn option_values(packet: &Packet, option: CoapOption) -> Vec<String> {
    packet
        .get_option(option)
        .map(|values| {
            values
                .iter()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .collect()
        })
        .unwrap_or_default()
}

fn format_option(packet: &Packet, option: CoapOption) -> Option<ContentFormat> {
    packet
        .get_option(option)
        .and_then(|values| values.front())
        .and_then(|v| ContentFormat::from_u16(decode_uint(v)))
}

fn request_type(method: Method) -> RequestType {
    match method {
        Method::Get => RequestType::Get,
        Method::Post => RequestType::Post,
        Method::Put => RequestType::Put,
        Method::Delete => RequestType::Delete,
    }
}

fn response_type(code: ResponseCode) -> ResponseType {
    match code.to_code_pair() {
        (2, 1) => ResponseType::Created,
        (2, 2) => ResponseType::Deleted,
        (2, 3) => ResponseType::Valid,
        (2, 4) => ResponseType::Changed,
        (2, 5) => ResponseType::Content,
        (4, 0) => ResponseType::BadRequest,
        (4, 1) => ResponseType::Unauthorized,
        (4, 2) => ResponseType::BadOption,
        (4, 3) => ResponseType::Forbidden,
        (4, 4) => ResponseType::NotFound,
        (4, 5) => ResponseType::MethodNotAllowed,
        (4, 6) => ResponseType::NotAcceptable,
        (4, 9) => ResponseType::Conflict,
        (4, 12) => ResponseType::PreconditionFailed,
        (4, 13) => ResponseType::RequestEntityTooLarge,
        (4, 15) => ResponseType::UnsupportedContentFormat,
        (5, 1) => ResponseType::NotImplemented,
        (5, 3) => ResponseType::ServiceUnavailable,
        _ => ResponseType::InternalServerError,
    }
}

fn response_code(response_type: ResponseType) -> ResponseCode {
    let (class, detail) = match response_type {
        ResponseType::Created => (2, 1),
        ResponseType::Deleted => (2, 2),
        ResponseType::Valid => (2, 3),
        ResponseType::Changed => (2, 4),
        ResponseType::Content => (2, 5),
        ResponseType::BadRequest => (4, 0),
        ResponseType::Unauthorized => (4, 1),
        ResponseType::BadOption => (4, 2),
        ResponseType::Forbidden => (4, 3),
        ResponseType::NotFound => (4, 4),
        ResponseType::MethodNotAllowed => (4, 5),
        ResponseType::NotAcceptable => (4, 6),
        ResponseType::Conflict => (4, 9),
        ResponseType::PreconditionFailed => (4, 12),
        ResponseType::RequestEntityTooLarge => (4, 13),
        ResponseType::UnsupportedContentFormat => (4, 15),
        ResponseType::NotImplemented => (5, 1),
        ResponseType::ServiceUnavailable => (5, 3),
        _ => (5, 0),
    };
    ResponseCode::from_code_pair(class, detail)
}

pub(crate) fn request_to_packet(request: &Request, message_id: u16, token: &[u8]) -> Packet {
    let mut packet = Packet::new();
    packet.header.message_id = message_id;
    packet.header.code = MessageClass::Request(request_type(request.method));
    packet.header.set_type(MessageType::Confirmable);
    packet.set_token(token.to_vec());

    for segment in request.segments() {
        packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    for piece in request
        .query
        .as_deref()
        .unwrap_or_default()
        .split('&')
        .filter(|p| !p.is_empty())
    {
        packet.add_option(CoapOption::UriQuery, piece.as_bytes().to_vec());
    }
    if let Some(format) = request.accept {
        packet.add_option(CoapOption::Accept, encode_uint(format.as_u16()));
    }
    if !request.payload.is_empty() {
        packet.payload = request.payload.clone();
        if let Some(format) = request.content_format {
            packet.add_option(CoapOption::ContentFormat, encode_uint(format.as_u16()));
        }
    }
    packet
}

pub(crate) fn packet_to_inbound(packet: &Packet, peer: SocketAddr) -> Option<Inbound> {
    let method = match packet.header.code {
        MessageClass::Request(RequestType::Get) => Method::Get,
        MessageClass::Request(RequestType::Post) => Method::Post,
        MessageClass::Request(RequestType::Put) => Method::Put,
        MessageClass::Request(RequestType::Delete) => Method::Delete,
        // Empty ACKs, resets and unsupported methods
        _ => return None,
    };

    let path = format!("/{}", option_values(packet, CoapOption::UriPath).join("/"));
    let query = option_values(packet, CoapOption::UriQuery);

    let mut request = Request::new(method, path);
    if !query.is_empty() {
        request.query = Some(query.join("&"));
    }
    request.payload = packet.payload.clone();
    request.content_format = format_option(packet, CoapOption::ContentFormat);
    request.accept = format_option(packet, CoapOption::Accept);
    request.source = Some(peer);

    Some(Inbound {
        request,
        peer,
        message_id: packet.header.message_id,
        token: packet.get_token().to_vec(),
        confirmable: packet.header.get_type() == MessageType::Confirmable,
    })
}

pub(crate) fn response_to_packet(response: &Response, inbound: &Inbound) -> Packet {
    let mut packet = Packet::new();
    packet.header.message_id = inbound.message_id;
    packet.header.set_type(if inbound.confirmable {
        MessageType::Acknowledgement
    } else {
        MessageType::NonConfirmable
    });
    packet.header.code = MessageClass::Response(response_type(response.code));
    packet.set_token(inbound.token.clone());

    for segment in &response.location_path {
        packet.add_option(CoapOption::LocationPath, segment.as_bytes().to_vec());
    }
    if !response.payload.is_empty() {
        packet.payload = response.payload.clone();
        if let Some(format) = response.content_format {
            packet.add_option(CoapOption::ContentFormat, encode_uint(format.as_u16()));
        }
    }
    packet
}

pub(crate) fn packet_to_response(packet: &Packet) -> Response {
    let code = match packet.header.code {
        MessageClass::Response(response_type) => response_code(response_type),
        _ => ResponseCode::InternalServerError,
    };
    Response {
        code,
        payload: packet.payload.clone(),
        content_format: format_option(packet, CoapOption::ContentFormat),
        location_path: option_values(packet, CoapOption::LocationPath),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_request_packet_carries_path_query_and_accept() {
        let request = Request::new(Method::Put, "/3/0")
            .with_query("pmin=1&pmax=5&")
            .with_accept(ContentFormat::LinkFormat);
        let packet = request_to_packet(&request, 7, &[0, 7]);
        let bytes = packet.to_bytes().unwrap();

        let decoded = Packet::from_bytes(&bytes).unwrap();
        let inbound = packet_to_inbound(&decoded, peer()).unwrap();

        assert_eq!(inbound.request.method, Method::Put);
        assert_eq!(inbound.request.path, "/3/0");
        assert_eq!(inbound.request.query.as_deref(), Some("pmin=1&pmax=5"));
        assert_eq!(inbound.request.accept, Some(ContentFormat::LinkFormat));
        assert_eq!(inbound.request.source, Some(peer()));
        assert_eq!(inbound.message_id, 7);
        assert!(inbound.confirmable);
    }

    #[test]
    fn test_response_packet_carries_location_path() {
        let inbound = Inbound {
            request: Request::new(Method::Post, "/rd"),
            peer: peer(),
            message_id: 3,
            token: vec![9],
            confirmable: true,
        };
        let packet = response_to_packet(&Response::created("/rd/12"), &inbound);
        let decoded = Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.header.get_type(), MessageType::Acknowledgement);
        assert_eq!(decoded.get_token(), &[9]);

        let response = packet_to_response(&decoded);
        assert_eq!(response.code, ResponseCode::Created);
        assert_eq!(response.location(), "/rd/12");
    }

    #[test]
    fn test_text_payload_and_content_format() {
        let inbound = Inbound {
            request: Request::new(Method::Get, "/3/0/1"),
            peer: peer(),
            message_id: 1,
            token: vec![],
            confirmable: false,
        };
        let response = Response::content("20", ContentFormat::TextPlain);
        let decoded = Packet::from_bytes(
            &response_to_packet(&response, &inbound).to_bytes().unwrap(),
        )
        .unwrap();

        let response = packet_to_response(&decoded);
        assert_eq!(response.payload_text(), "20");
        assert_eq!(response.content_format, Some(ContentFormat::TextPlain));
        assert_eq!(response.code, ResponseCode::Content);
    }

    #[test]
    fn test_uint_option_encoding() {
        assert!(encode_uint(0).is_empty());
        assert_eq!(encode_uint(40), vec![40]);
        assert_eq!(decode_uint(&encode_uint(11542)), 11542);
    }

    #[test]
    fn test_loopback_exchange() {
        let mut listener = UdpListener::bind(0).unwrap();
        let port = listener.local_port();

        let server = std::thread::spawn(move || {
            loop {
                if let Some(inbound) = listener.recv().unwrap() {
                    let response = Response::content(
                        inbound.request.path.clone(),
                        ContentFormat::TextPlain,
                    );
                    listener.respond(&inbound, &response).unwrap();
                    break;
                }
            }
        });

        let transport = UdpTransport::new(Duration::from_secs(2));
        let response = transport
            .send(
                &Endpoint::new("127.0.0.1", port),
                &Request::new(Method::Get, "/3/0/1"),
            )
            .unwrap();
        server.join().unwrap();

        assert_eq!(response.code, ResponseCode::Content);
        assert_eq!(response.payload_text(), "/3/0/1");
    }

    #[test]
    fn test_requests_leave_from_the_listening_socket() {
        use std::sync::atomic::AtomicBool;

        let transport = UdpTransport::new(Duration::from_secs(2));
        let mut listener = transport.listen(0).unwrap();
        let listening_port = listener.local_port();

        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let peer_port = peer.local_addr().unwrap().port();
        let answer = std::thread::spawn(move || {
            let mut buf = [0u8; MAX_DATAGRAM];
            let (len, from) = peer.recv_from(&mut buf).unwrap();
            let inbound = packet_to_inbound(&Packet::from_bytes(&buf[..len]).unwrap(), from).unwrap();
            let reply = response_to_packet(
                &Response::content("ok", ContentFormat::TextPlain),
                &inbound,
            );
            peer.send_to(&reply.to_bytes().unwrap(), from).unwrap();
            from.port()
        });

        // The listener's poll loop delivers the response
        let done = Arc::new(AtomicBool::new(false));
        let stop = done.clone();
        let poller = std::thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                assert!(listener.recv().unwrap().is_none());
            }
            listener.close().unwrap();
        });

        let response = transport
            .send(
                &Endpoint::new("127.0.0.1", peer_port),
                &Request::new(Method::Get, "/3/0/0"),
            )
            .unwrap();
        done.store(true, Ordering::SeqCst);
        poller.join().unwrap();

        assert_eq!(answer.join().unwrap(), listening_port);
        assert_eq!(response.payload_text(), "ok");
        assert!(transport.bound_socket().is_none());
    }
}
