//! Shared helpers for the crate's unit tests.

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request};
use axum::http::header::{COOKIE, HOST, LOCATION, SET_COOKIE};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, Key};
use oauth2::url::Url;
use rootcause::prelude::Report;
use std::sync::Arc;
use tower::ServiceExt;

use crate::authorizer::{Authorizer, OAuthClientConfig};
use crate::error::AuthorizerError;
use crate::flow::AuthGateway;
use crate::session::{Session, SessionStore};

/// Authorizer that answers every code with a fixed outcome.
pub(crate) struct FakeAuthorizer {
    oauth: OAuthClientConfig,
    outcome: Result<String, AuthorizerError>,
}

impl FakeAuthorizer {
    pub(crate) fn gateway(outcome: Result<String, AuthorizerError>) -> AuthGateway {
        let authorizer = Self {
            oauth: OAuthClientConfig {
                provider: "fake".to_string(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                auth_url: "https://provider.example.net/authorize".to_string(),
                token_url: "https://provider.example.net/token".to_string(),
                redirect_url: Some("https://oauth.example.com/authorized".to_string()),
                scopes: vec!["read:org".to_string()],
            },
            outcome,
        };
        let sessions = SessionStore::new(Key::generate(), "_s1").with_domain("example.com");
        AuthGateway::new(sessions, Arc::new(authorizer))
    }
}

#[async_trait]
impl Authorizer for FakeAuthorizer {
    fn oauth_config(&self) -> &OAuthClientConfig {
        &self.oauth
    }

    async fn authorize(&self, _code: &str) -> Result<String, Report<AuthorizerError>> {
        self.outcome.clone().map_err(|e| e.into())
    }
}

/// Carries the session cookie between requests the way a browser would.
#[derive(Debug, Default)]
pub(crate) struct Browser {
    cookie: Option<String>,
}

impl Browser {
    pub(crate) fn from_jar(jar: PrivateCookieJar) -> Self {
        let mut browser = Self::default();
        browser.absorb(&jar.into_response());
        browser
    }

    /// Request headers carrying the current cookie, if any.
    pub(crate) fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &self.cookie {
            headers.insert(COOKIE, cookie.parse().unwrap());
        }
        headers
    }

    pub(crate) async fn get(&mut self, app: Router, host: &str, uri: &str) -> Response {
        let mut request = Request::builder().uri(uri).header(HOST, host);
        if let Some(cookie) = &self.cookie {
            request = request.header(COOKIE, cookie);
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        self.absorb(&response);
        response
    }

    fn absorb(&mut self, response: &Response) {
        for value in response.headers().get_all(SET_COOKIE) {
            let cookie = Cookie::parse(value.to_str().unwrap().to_string()).unwrap();
            self.cookie = Some(format!("{}={}", cookie.name(), cookie.value()));
        }
    }
}

/// Decrypts the session a browser would send.
pub(crate) fn session_from(gateway: &AuthGateway, headers: &HeaderMap) -> Session {
    gateway.sessions().load(headers).1
}

/// Extracts the `state` query parameter from a login redirect.
pub(crate) fn state_param(response: &Response) -> String {
    let location = response.headers()[LOCATION].to_str().unwrap();
    let url = Url::parse(location).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}
