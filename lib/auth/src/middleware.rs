//! Middleware guarding routes behind an authorized session.
//!
//! ```ignore
//! let protected = Router::new()
//!     .fallback(proxy)
//!     .layer(axum::middleware::from_fn_with_state(gateway, require_session));
//! ```

use axum::extract::{Request, State};
use axum::http::header::HOST;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::flow::AuthGateway;

/// Identity of the authorized user, inserted into request extensions before
/// the request reaches the protected handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayUser(pub String);

/// Passes authorized requests through; sends everyone else to log in.
///
/// Before redirecting, the absolute URL of the current request is stored in
/// the session so the callback can send the user back to it.
pub async fn require_session(
    State(gateway): State<AuthGateway>,
    mut request: Request,
    next: Next,
) -> Response {
    let (jar, mut session) = gateway.sessions().load(request.headers());

    if session.is_authorized() {
        if let Some(user) = session.user() {
            request
                .extensions_mut()
                .insert(GatewayUser(user.to_string()));
        }
        return next.run(request).await;
    }

    let redirect_url = absolute_url(&request, gateway.https());
    tracing::debug!(url = %redirect_url, "unauthorized request, starting login");
    session.set_redirect_url(redirect_url);

    let jar = match gateway.sessions().save(jar, &session) {
        Ok(jar) => jar,
        Err(e) => return e.into_response(),
    };

    match gateway.login(jar, session) {
        Ok(redirect) => redirect.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Reconstructs the absolute URL the client requested.
///
/// The scheme comes from the request URI when present, otherwise from the
/// gateway's configured public scheme.
fn absolute_url(request: &Request, https: bool) -> String {
    let uri = request.uri();
    let scheme = uri
        .scheme_str()
        .unwrap_or(if https { "https" } else { "http" });
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .unwrap_or_default();
    let path = uri
        .path_and_query()
        .map(|path_and_query| path_and_query.as_str())
        .unwrap_or("/");

    format!("{scheme}://{host}{path}")
}
