//! LWM2M-specific CoAP types and constants
//!
//! This module defines the CoAP vocabulary used by the protocol engine.
//! These abstractions keep the router and the operation layer independent
//! of the CoAP implementation doing the actual wire work.

use crate::error::{Lwm2mError, Result};
use std::net::SocketAddr;

/// CoAP Content-Format identifiers used by LWM2M
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ContentFormat {
    /// text/plain;charset=utf-8
    TextPlain = 0,
    /// application/link-format (RFC 6690)
    LinkFormat = 40,
    /// application/octet-stream
    OctetStream = 42,
    /// application/json
    Json = 50,
}

impl ContentFormat {
    /// Convert from raw content-format ID
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::TextPlain),
            40 => Some(Self::LinkFormat),
            42 => Some(Self::OctetStream),
            50 => Some(Self::Json),
            _ => None,
        }
    }

    /// Get the raw content-format ID
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// CoAP request methods used by LWM2M
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Parse an upper-case method name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
            Method::Put => f.write_str("PUT"),
            Method::Delete => f.write_str("DELETE"),
        }
    }
}

/// CoAP response codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    // Success codes
    /// 2.01 Created
    Created,
    /// 2.02 Deleted
    Deleted,
    /// 2.04 Changed
    Changed,
    /// 2.05 Content
    Content,

    // Client error codes
    /// 4.00 Bad Request
    BadRequest,
    /// 4.04 Not Found
    NotFound,
    /// 4.05 Method Not Allowed
    MethodNotAllowed,

    // Server error codes
    /// 5.00 Internal Server Error
    InternalServerError,

    /// Any other code, kept as (class, detail)
    Other(u8, u8),
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (class, detail) = self.to_code_pair();
        write!(f, "{}.{:02}", class, detail)
    }
}

impl ResponseCode {
    /// Convert to CoAP response code format (class.detail)
    pub fn to_code_pair(self) -> (u8, u8) {
        match self {
            Self::Created => (2, 1),
            Self::Deleted => (2, 2),
            Self::Changed => (2, 4),
            Self::Content => (2, 5),
            Self::BadRequest => (4, 0),
            Self::NotFound => (4, 4),
            Self::MethodNotAllowed => (4, 5),
            Self::InternalServerError => (5, 0),
            Self::Other(class, detail) => (class, detail),
        }
    }

    /// Build from a (class, detail) pair, folding known codes into named variants
    pub fn from_code_pair(class: u8, detail: u8) -> Self {
        match (class, detail) {
            (2, 1) => Self::Created,
            (2, 2) => Self::Deleted,
            (2, 4) => Self::Changed,
            (2, 5) => Self::Content,
            (4, 0) => Self::BadRequest,
            (4, 4) => Self::NotFound,
            (4, 5) => Self::MethodNotAllowed,
            (5, 0) => Self::InternalServerError,
            (class, detail) => Self::Other(class, detail),
        }
    }

    /// Parse the dotted form, e.g. "2.05"
    pub fn parse(code: &str) -> Option<Self> {
        let (class, detail) = code.split_once('.')?;
        Some(Self::from_code_pair(class.parse().ok()?, detail.parse().ok()?))
    }

    /// Check if this is a success code
    pub fn is_success(self) -> bool {
        self.to_code_pair().0 == 2
    }
}

/// Parse a query string into ordered (name, value) pairs.
///
/// Empty pieces are skipped, so a trailing `&` is accepted. A piece
/// without `=` yields an empty value.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (part.to_string(), String::new()),
        })
        .collect()
}

/// Format one `name=value` query piece.
///
/// Values are sent unescaped, so a value holding `&` or `=` would smuggle
/// extra parameters and is rejected.
pub fn query_pair(name: &str, value: &str) -> Result<String> {
    if value.contains(['&', '=']) {
        return Err(Lwm2mError::BadRequest(format!(
            "query value for '{name}' may not contain '&' or '='"
        )));
    }
    Ok(format!("{name}={value}"))
}

/// A CoAP request (transport-agnostic)
#[derive(Debug, Clone)]
pub struct Request {
    /// The request method
    pub method: Method,
    /// Absolute path, e.g. "/3/0/1" or "/rd"
    pub path: String,
    /// Raw query string without the leading '?'
    pub query: Option<String>,
    /// Request payload
    pub payload: Vec<u8>,
    /// Content format of the payload
    pub content_format: Option<ContentFormat>,
    /// Representation requested by the sender
    pub accept: Option<ContentFormat>,
    /// Peer that sent the request, filled in by listeners
    pub source: Option<SocketAddr>,
}

impl Request {
    /// Create a new request
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            payload: Vec::new(),
            content_format: None,
            accept: None,
            source: None,
        }
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>, format: ContentFormat) -> Self {
        self.payload = payload.into();
        self.content_format = Some(format);
        self
    }

    /// Set the raw query string (a leading '?' is stripped)
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = Some(query.trim_start_matches('?').to_string());
        self
    }

    /// Set the Accept option
    pub fn with_accept(mut self, format: ContentFormat) -> Self {
        self.accept = Some(format);
        self
    }

    /// Path split into its non-empty segments
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Parsed query parameters
    pub fn query_params(&self) -> Vec<(String, String)> {
        self.query.as_deref().map(parse_query).unwrap_or_default()
    }

    /// Value of the first query parameter with this name
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query_params()
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Payload decoded as UTF-8 text
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// A CoAP response (transport-agnostic)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response code
    pub code: ResponseCode,
    /// Response payload
    pub payload: Vec<u8>,
    /// Content format of the payload
    pub content_format: Option<ContentFormat>,
    /// Location-Path option segments
    pub location_path: Vec<String>,
}

impl Response {
    /// Create an empty response with the given code
    pub fn empty(code: ResponseCode) -> Self {
        Self {
            code,
            payload: Vec::new(),
            content_format: None,
            location_path: Vec::new(),
        }
    }

    /// Create a success response with content
    pub fn content(payload: impl Into<Vec<u8>>, format: ContentFormat) -> Self {
        Self {
            code: ResponseCode::Content,
            payload: payload.into(),
            content_format: Some(format),
            location_path: Vec::new(),
        }
    }

    /// Create a created response pointing at a new resource
    pub fn created(location: &str) -> Self {
        let mut response = Self::empty(ResponseCode::Created);
        response.location_path = location
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        response
    }

    /// Create a changed response
    pub fn changed() -> Self {
        Self::empty(ResponseCode::Changed)
    }

    /// Create a deleted response
    pub fn deleted() -> Self {
        Self::empty(ResponseCode::Deleted)
    }

    /// Create an error response
    pub fn error(code: ResponseCode, message: &str) -> Self {
        Self {
            code,
            payload: message.as_bytes().to_vec(),
            content_format: Some(ContentFormat::TextPlain),
            location_path: Vec::new(),
        }
    }

    /// Create a not found response with an empty body
    pub fn not_found() -> Self {
        Self::empty(ResponseCode::NotFound)
    }

    /// Payload decoded as UTF-8 text
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Location-Path segments joined into an absolute path
    pub fn location(&self) -> String {
        format!("/{}", self.location_path.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_pair_rejects_separators() {
        assert_eq!(query_pair("ep", "dev-1").unwrap(), "ep=dev-1");
        assert!(matches!(
            query_pair("pmin", "1&cancel="),
            Err(Lwm2mError::BadRequest(_))
        ));
        assert!(query_pair("ep", "a=b").is_err());
    }

    #[test]
    fn test_content_format_conversion() {
        assert_eq!(ContentFormat::from_u16(40), Some(ContentFormat::LinkFormat));
        assert_eq!(ContentFormat::TextPlain.as_u16(), 0);
        assert_eq!(ContentFormat::from_u16(11542), None);
    }

    #[test]
    fn test_response_code() {
        assert_eq!(ResponseCode::Content.to_code_pair(), (2, 5));
        assert!(ResponseCode::Changed.is_success());
        assert!(!ResponseCode::NotFound.is_success());
        assert_eq!(ResponseCode::parse("4.04"), Some(ResponseCode::NotFound));
        assert_eq!(ResponseCode::parse("4.06"), Some(ResponseCode::Other(4, 6)));
        assert_eq!(ResponseCode::Other(4, 6).to_string(), "4.06");
        assert_eq!(ResponseCode::parse("garbage"), None);
    }

    #[test]
    fn test_query_parse_tolerates_trailing_separator() {
        let params = parse_query("pmin=1&pmax=5&");
        assert_eq!(
            params,
            vec![
                ("pmin".to_string(), "1".to_string()),
                ("pmax".to_string(), "5".to_string())
            ]
        );
    }

    #[test]
    fn test_created_location() {
        let response = Response::created("/rd/7");
        assert_eq!(response.location_path, vec!["rd", "7"]);
        assert_eq!(response.location(), "/rd/7");
    }
}
