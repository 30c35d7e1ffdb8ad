//! gatehouse server: an authenticating reverse proxy.
//!
//! Requests are dispatched by host (see [`host`]); backends configured with
//! `auth = true` are only reachable with a session authorized through
//! [`gatehouse_auth`].

pub mod config;
pub mod error;
pub mod health;
pub mod host;
pub mod proxy;
