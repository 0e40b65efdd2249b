//! Error types for rust-lwm2m

use crate::coap_types::ResponseCode;
use thiserror::Error;

/// Main error type for LWM2M operations
#[derive(Debug, Error)]
pub enum Lwm2mError {
    /// The server rejected the registration request
    #[error("Registration failed with code {0}")]
    RegistrationFailed(ResponseCode),

    /// The server could not be reached while registering
    #[error("LWM2M server not found: {0}")]
    ServerNotFound(String),

    /// The addressed object or resource does not exist (maps to CoAP 4.04)
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// A device answered with a code other than the expected one
    #[error("Client error: {0}")]
    ClientError(ResponseCode),

    /// Write-Attributes received names outside the attribute whitelist
    #[error("Unsupported attributes: {}", .0.join(", "))]
    UnsupportedAttributes(Vec<String>),

    /// No device with this id is registered
    #[error("Device not found in registry: {0}")]
    RegistryLookupFailed(u64),

    /// Transport level failure (socket, codec, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error (sockets, config files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error (config files)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed object/instance/resource path
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Malformed inbound request (maps to CoAP 4.00)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A route names an operation without a handler pair
    #[error("No handler installed for operation {0}")]
    MissingHandler(&'static str),

    /// Router lifecycle failure
    #[error("Router error: {0}")]
    Router(String),
}

impl Lwm2mError {
    /// CoAP code a library handler answers with when this error aborts a request
    pub fn response_code(&self) -> ResponseCode {
        match self {
            Self::ObjectNotFound(_) | Self::RegistryLookupFailed(_) => ResponseCode::NotFound,
            Self::BadRequest(_) | Self::InvalidAddress(_) | Self::UnsupportedAttributes(_) => {
                ResponseCode::BadRequest
            }
            Self::ClientError(code) => *code,
            _ => ResponseCode::InternalServerError,
        }
    }
}

/// Result type alias for LWM2M operations
pub type Result<T> = std::result::Result<T, Lwm2mError>;
