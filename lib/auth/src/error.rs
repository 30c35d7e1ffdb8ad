//! Error types for the gatehouse-auth crate.
//!
//! Errors are split by when they can happen:
//! - `AuthorizerError`: building an authorizer at startup, or a provider
//!   exchange failing at request time. Returned wrapped in a rootcause
//!   `Report` so callers can layer context.
//! - `GatewayError`: per-request failures of the login/callback flow. These
//!   render directly as HTTP responses with a generic message; detail stays
//!   in the server log.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

/// Errors from constructing or running an authorizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizerError {
    /// No authorizer is registered under the requested type name.
    UnknownType { type_name: String },
    /// The configuration did not decode into the shape the type expects.
    ConfigDecode { type_name: String, details: String },
    /// The provider identified the user, but policy rejected them.
    Unauthorized { user: String, reason: String },
    /// Transport or provider failure during the code exchange.
    Upstream { provider: String, details: String },
}

impl fmt::Display for AuthorizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownType { type_name } => {
                write!(f, "unknown authorizer type {type_name:?}")
            }
            Self::ConfigDecode { type_name, details } => {
                write!(f, "invalid config for authorizer {type_name:?}: {details}")
            }
            Self::Unauthorized { user, reason } => {
                write!(f, "user {user:?} is not authorized: {reason}")
            }
            Self::Upstream { provider, details } => {
                write!(f, "{provider} request failed: {details}")
            }
        }
    }
}

impl std::error::Error for AuthorizerError {}

/// Errors from the login and callback steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The callback arrived without an authorization code.
    MissingCode,
    /// The callback state was absent or did not match the session.
    MissingState,
    /// The authorizer rejected the code or the user.
    Unauthorized,
    /// Authentication succeeded but the session lost the original URL.
    MissingRedirectUrl,
    /// The session could not be written back to the client.
    SessionSave { details: String },
    /// The provider login URL could not be built.
    LoginUrl { details: String },
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCode => write!(f, "missing authorization code"),
            Self::MissingState => write!(f, "missing or mismatched state"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::MissingRedirectUrl => write!(f, "missing redirect URL"),
            Self::SessionSave { details } => write!(f, "failed to save session: {details}"),
            Self::LoginUrl { details } => write!(f, "failed to build login URL: {details}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// The HTTP status this error is reported with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingCode => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::MissingState
            | Self::MissingRedirectUrl
            | Self::SessionSave { .. }
            | Self::LoginUrl { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message shown to the client. Never carries internal detail.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MissingCode => "Missing authorization code.",
            Self::MissingState => "Something went wrong. Please try again.",
            Self::Unauthorized => "Unauthorized.",
            Self::MissingRedirectUrl => "Signed in, but the original destination was lost.",
            Self::SessionSave { .. } | Self::LoginUrl { .. } => "Internal server error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            Self::MissingState => {
                tracing::warn!("callback state missing or mismatched");
            }
            Self::SessionSave { details } => {
                tracing::error!(error = %details, "failed to save session");
            }
            Self::LoginUrl { details } => {
                tracing::error!(error = %details, "failed to build login URL");
            }
            Self::MissingRedirectUrl => {
                tracing::error!("authorized session has no redirect URL");
            }
            Self::MissingCode | Self::Unauthorized => {}
        }

        (self.status(), self.public_message()).into_response()
    }
}
