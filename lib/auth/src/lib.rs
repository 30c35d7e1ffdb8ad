//! OAuth2 authentication gateway for gatehouse.
//!
//! This crate provides:
//! - Pluggable identity providers (`Authorizer`) built by type name from an
//!   `AuthorizerRegistry`: GitHub organization membership and Google email
//!   pattern matching
//! - Client-held, encrypted session state (`Session`, `SessionStore`)
//! - The login/callback flow (`AuthGateway`, `callback`)
//! - Middleware that guards any handler behind an authorized session
//!   (`require_session`)
//!
//! # Flow
//!
//! An unauthorized request passing through [`require_session`] has its URL
//! remembered in the session and is redirected to the provider with a fresh
//! CSRF state token. The provider sends the browser back to the callback
//! path, where [`callback`] checks the token, asks the authorizer who the
//! user is, marks the session authorized and redirects to the remembered URL.
//!
//! # Example
//!
//! ```no_run
//! use axum::{Router, middleware, routing::get};
//! use axum_extra::extract::cookie::Key;
//! use gatehouse_auth::{AuthGateway, AuthorizerRegistry, SessionStore, callback, require_session};
//!
//! let authorizer = AuthorizerRegistry::default()
//!     .construct("github-org", br#"{"ClientID":"x","ClientSecret":"y","OrgID":42}"#)
//!     .expect("valid authorizer config");
//! let sessions = SessionStore::new(Key::generate(), "_s1").with_domain("example.com");
//! let gateway = AuthGateway::new(sessions, authorizer);
//!
//! let app: Router = Router::new()
//!     .route("/private", get(|| async { "secret" }))
//!     .layer(middleware::from_fn_with_state(gateway.clone(), require_session))
//!     .merge(Router::new().route("/authorized", get(callback)).with_state(gateway));
//! ```

pub mod authorizer;
pub mod error;
pub mod flow;
pub mod middleware;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types at crate root
pub use authorizer::{
    Authorizer, AuthorizerConfig, AuthorizerRegistry, ConfigurableAuthorizer, OAuthClientConfig,
};
pub use error::{AuthorizerError, GatewayError};
pub use flow::{AuthGateway, CallbackParams, callback};
pub use middleware::{GatewayUser, require_session};
pub use session::{Session, SessionKey, SessionStore};
