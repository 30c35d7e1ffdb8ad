//! Error types for the gateway server.
//!
//! Startup errors are fatal and reported through rootcause in `main`.
//! Proxy errors are per-request and render as generic HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::fmt;

/// Failures that prevent the server from starting.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration could not be loaded.
    Config { details: String },
    /// The configured session key is unusable.
    SessionKey { details: String },
    /// The authorizer could not be constructed.
    Authorizer { details: String },
    /// A backend URL or the outbound HTTP client is invalid.
    Backend { details: String },
    /// The listen address could not be bound.
    Bind { addr: String, details: String },
    /// The server stopped with an error.
    Serve { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "failed to load configuration: {details}"),
            Self::SessionKey { details } => write!(f, "invalid session key: {details}"),
            Self::Authorizer { details } => {
                write!(f, "failed to construct authorizer: {details}")
            }
            Self::Backend { details } => write!(f, "invalid backend configuration: {details}"),
            Self::Bind { addr, details } => {
                write!(f, "failed to bind to '{addr}': {details}")
            }
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for StartupError {}

/// Failures while forwarding a request to a backend.
#[derive(Debug)]
pub enum ProxyError {
    /// No backend is configured for the requested host.
    UnknownBackend { host: String },
    /// The request body could not be read.
    RequestBody { details: String },
    /// The backend did not answer in time.
    Timeout { backend: String },
    /// The backend could not be reached or returned an unreadable response.
    Upstream { backend: String, details: String },
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownBackend { host } => write!(f, "no backend for host '{host}'"),
            Self::RequestBody { details } => write!(f, "failed to read request body: {details}"),
            Self::Timeout { backend } => write!(f, "backend '{backend}' timed out"),
            Self::Upstream { backend, details } => {
                write!(f, "backend '{backend}' failed: {details}")
            }
        }
    }
}

impl std::error::Error for ProxyError {}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::UnknownBackend { .. } => (StatusCode::NOT_FOUND, "Not found"),
            Self::RequestBody { details } => {
                tracing::warn!(error = %details, "failed to read request body");
                (StatusCode::BAD_REQUEST, "Failed to read request body")
            }
            Self::Timeout { backend } => {
                tracing::error!(backend = %backend, "backend timed out");
                (StatusCode::GATEWAY_TIMEOUT, "Gateway timeout")
            }
            Self::Upstream { backend, details } => {
                tracing::error!(backend = %backend, error = %details, "backend request failed");
                (StatusCode::BAD_GATEWAY, "Bad gateway")
            }
        };

        (status, message).into_response()
    }
}
