//! Host-based dispatch.
//!
//! Requests are routed by their `Host` header:
//!
//! | Host               | Router                                    |
//! |--------------------|-------------------------------------------|
//! | `oauth.<domain>`   | OAuth callback on `/authorized`           |
//! | `health.<domain>`  | backend health on `/check`                |
//! | `<name>.<domain>`  | proxy to backend `name`, guarded if `auth` |
//!
//! Anything else is answered with 404.

use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::http::header::HOST;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use gatehouse_auth::{AuthGateway, callback, require_session};
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::error::StartupError;
use crate::health;
use crate::proxy::{self, ProxyState, SelectedBackend};

/// Path the identity provider redirects back to.
pub const CALLBACK_PATH: &str = "/authorized";

/// Path of the health report.
pub const HEALTH_PATH: &str = "/check";

/// Where a host is routed.
#[derive(Debug, PartialEq, Eq)]
pub enum Target<'a> {
    Callback,
    Health,
    Backend(&'a str),
    Unknown,
}

/// Classifies a `Host` header value against the base domain.
///
/// The port is ignored and exactly one lowercase alphabetic label must
/// precede the domain.
pub fn classify<'a>(host: &'a str, domain: &str) -> Target<'a> {
    let host = host.split(':').next().unwrap_or_default();
    let Some(label) = host
        .strip_suffix(domain)
        .and_then(|rest| rest.strip_suffix('.'))
    else {
        return Target::Unknown;
    };

    if label.is_empty() || !label.bytes().all(|b| b.is_ascii_lowercase()) {
        return Target::Unknown;
    }

    match label {
        "oauth" => Target::Callback,
        "health" => Target::Health,
        name => Target::Backend(name),
    }
}

#[derive(Clone)]
struct HostRouter {
    domain: String,
    proxy: ProxyState,
    callback: Router,
    health: Router,
    protected: Router,
    public: Router,
}

/// Builds the gateway application.
///
/// # Errors
///
/// Returns `StartupError::Backend` if a backend is misconfigured.
pub fn app(config: &ServerConfig, gateway: AuthGateway) -> Result<Router, StartupError> {
    let proxy = ProxyState::new(&config.backends)?;

    let callback = Router::new()
        .route(CALLBACK_PATH, get(callback))
        .fallback(not_found)
        .with_state(gateway.clone());

    let health = Router::new()
        .route(HEALTH_PATH, get(health::check))
        .fallback(not_found)
        .with_state(proxy.clone());

    let public = Router::new()
        .fallback(proxy::forward)
        .with_state(proxy.clone());

    let protected = Router::new()
        .fallback(proxy::forward)
        .layer(from_fn_with_state(gateway, require_session))
        .with_state(proxy.clone());

    let hosts = HostRouter {
        domain: config.domain.to_ascii_lowercase(),
        proxy,
        callback,
        health,
        protected,
        public,
    };

    Ok(Router::new()
        .fallback(dispatch)
        .with_state(hosts)
        .layer(TraceLayer::new_for_http()))
}

async fn dispatch(State(hosts): State<HostRouter>, mut request: Request) -> Response {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().host())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let router = match classify(&host, &hosts.domain) {
        Target::Callback => hosts.callback,
        Target::Health => hosts.health,
        Target::Backend(name) => match hosts.proxy.backend(name) {
            Some(backend) => {
                let router = if backend.auth {
                    hosts.protected
                } else {
                    hosts.public
                };
                request.extensions_mut().insert(SelectedBackend(backend));
                router
            }
            None => {
                tracing::debug!(host = %host, "no backend configured");
                return not_found().await.into_response();
            }
        },
        Target::Unknown => {
            tracing::debug!(host = %host, "unrecognized host");
            return not_found().await.into_response();
        }
    };

    router
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {})
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}
