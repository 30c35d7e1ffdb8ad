//! Request forwarding to configured backends.
//!
//! WebSocket upgrades are not passed through.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use gatehouse_auth::GatewayUser;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BackendConfig;
use crate::error::{ProxyError, StartupError};

/// Largest request body forwarded to a backend.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Headers that apply to a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Header carrying the authenticated identity to protected backends.
pub const FORWARDED_USER: &str = "x-forwarded-user";

/// A backend reachable at `<name>.<domain>`.
#[derive(Debug, Clone)]
pub struct Backend {
    pub name: String,
    pub url: String,
    pub auth: bool,
    pub health_check: Option<String>,
}

/// Backend chosen by host dispatch, stored in request extensions.
#[derive(Debug, Clone)]
pub struct SelectedBackend(pub Arc<Backend>);

/// Shared state for forwarding and health checks.
#[derive(Clone)]
pub struct ProxyState {
    backends: Arc<HashMap<String, Arc<Backend>>>,
    client: reqwest::Client,
}

impl ProxyState {
    /// Builds the backend table and the outbound client.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::Backend` if a backend URL is not absolute
    /// http(s) or the HTTP client cannot be created.
    pub fn new(backends: &HashMap<String, BackendConfig>) -> Result<Self, StartupError> {
        let mut table = HashMap::new();
        for (name, config) in backends {
            if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
                return Err(StartupError::Backend {
                    details: format!("backend '{name}' has non-http URL '{}'", config.url),
                });
            }
            table.insert(
                name.clone(),
                Arc::new(Backend {
                    name: name.clone(),
                    url: config.url.trim_end_matches('/').to_string(),
                    auth: config.auth,
                    health_check: config.health_check.clone(),
                }),
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| StartupError::Backend {
                details: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            backends: Arc::new(table),
            client,
        })
    }

    /// Looks up a backend by subdomain name.
    #[must_use]
    pub fn backend(&self, name: &str) -> Option<Arc<Backend>> {
        self.backends.get(name).cloned()
    }

    /// Iterates over all backends.
    pub fn backends(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.backends.values()
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Forwards the request to the backend selected by host dispatch.
pub async fn forward(State(proxy): State<ProxyState>, request: Request) -> Response {
    match forward_inner(&proxy, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn forward_inner(proxy: &ProxyState, request: Request) -> Result<Response, ProxyError> {
    let Some(SelectedBackend(backend)) = request.extensions().get::<SelectedBackend>().cloned()
    else {
        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        return Err(ProxyError::UnknownBackend { host });
    };

    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target_url = format!("{}{path_and_query}", backend.url);

    tracing::debug!(
        backend = %backend.name,
        method = %parts.method,
        target_url = %target_url,
        "forwarding request"
    );

    let mut headers = forwardable_headers(&parts.headers);
    if let Some(host) = parts.headers.get(header::HOST) {
        headers.insert(HeaderName::from_static("x-forwarded-host"), host.clone());
    }
    if let Some(GatewayUser(user)) = parts.extensions.get::<GatewayUser>() {
        if let Ok(value) = HeaderValue::from_str(user) {
            headers.insert(HeaderName::from_static(FORWARDED_USER), value);
        }
    } else {
        // Never let a client assert an identity on its own.
        headers.remove(FORWARDED_USER);
    }

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ProxyError::RequestBody {
            details: e.to_string(),
        })?;

    let upstream = proxy
        .client()
        .request(parts.method, &target_url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProxyError::Timeout {
                    backend: backend.name.clone(),
                }
            } else {
                ProxyError::Upstream {
                    backend: backend.name.clone(),
                    details: e.to_string(),
                }
            }
        })?;

    convert_response(&backend.name, upstream).await
}

/// Copies request headers, dropping hop-by-hop headers and `Host`.
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if name == header::HOST || HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

async fn convert_response(
    backend: &str,
    upstream: reqwest::Response,
) -> Result<Response, ProxyError> {
    let status = upstream.status();
    let headers = upstream.headers().clone();
    let body = upstream.bytes().await.map_err(|e| ProxyError::Upstream {
        backend: backend.to_string(),
        details: format!("failed to read response body: {e}"),
    })?;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    for (name, value) in &headers {
        if HOP_BY_HOP.contains(&name.as_str()) || name == header::CONTENT_LENGTH {
            continue;
        }
        response.headers_mut().append(name.clone(), value.clone());
    }
    Ok(response)
}
