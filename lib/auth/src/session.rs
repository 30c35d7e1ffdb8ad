//! Client-held session state.
//!
//! The whole session lives in one encrypted cookie. The server keeps no
//! per-session memory; it only holds the key and the cookie attributes in a
//! [`SessionStore`], built once at startup and shared read-only.

use axum::http::HeaderMap;
use axum::http::header::SET_COOKIE;
use axum::response::IntoResponse;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, Key};
use serde::{Deserialize, Serialize};
use time::Duration;

use crate::error::GatewayError;

/// Largest encrypted `name=value` pair accepted for the session cookie.
pub const MAX_COOKIE_BYTES: usize = 4096;

/// Keys used in the session payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKey {
    /// Set to true once the identity exchange succeeded.
    Authorized,
    /// Absolute URL the user asked for before being sent to log in.
    RedirectUrl,
    /// Single-use CSRF token for the outstanding login.
    State,
    /// Identity returned by the authorizer.
    User,
}

impl SessionKey {
    /// Returns the key as stored in the cookie payload.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorized => "auth",
            Self::RedirectUrl => "redir",
            Self::State => "state",
            Self::User => "user",
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded session values.
///
/// `state` and `redirect_url` are only reachable through `take_*` so a
/// read always removes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "auth", default, skip_serializing_if = "Option::is_none")]
    authorized: Option<bool>,
    #[serde(rename = "redir", default, skip_serializing_if = "Option::is_none")]
    redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
}

impl Session {
    /// Returns true only if the session carries `auth = true`.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.authorized == Some(true)
    }

    /// Returns the authenticated identity, if any.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Removes the authorized flag.
    pub fn clear_authorized(&mut self) {
        self.authorized = None;
    }

    /// Records a successful identity exchange.
    pub fn mark_authorized(&mut self, user: String) {
        self.user = Some(user);
        self.authorized = Some(true);
    }

    pub fn set_state(&mut self, state: String) {
        self.state = Some(state);
    }

    /// Reads and removes the stored CSRF state.
    pub fn take_state(&mut self) -> Option<String> {
        self.state.take()
    }

    pub fn set_redirect_url(&mut self, url: String) {
        self.redirect_url = Some(url);
    }

    /// Reads and removes the stored redirect URL.
    pub fn take_redirect_url(&mut self) -> Option<String> {
        self.redirect_url.take()
    }

    /// Returns true if the given key currently holds a value.
    #[must_use]
    pub fn contains(&self, key: SessionKey) -> bool {
        match key {
            SessionKey::Authorized => self.authorized.is_some(),
            SessionKey::RedirectUrl => self.redirect_url.is_some(),
            SessionKey::State => self.state.is_some(),
            SessionKey::User => self.user.is_some(),
        }
    }
}

/// Loads and saves sessions carried in an encrypted cookie.
#[derive(Clone)]
pub struct SessionStore {
    key: Key,
    name: String,
    domain: Option<String>,
    max_age: Duration,
    secure: bool,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("name", &self.name)
            .field("domain", &self.domain)
            .field("max_age", &self.max_age)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Creates a store that encrypts with `key` and names its cookie `name`.
    ///
    /// Defaults: no domain, one day max age, secure cookies.
    #[must_use]
    pub fn new(key: Key, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            domain: None,
            max_age: Duration::hours(24),
            secure: true,
        }
    }

    /// Scopes the cookie to `domain`.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Sets the `Secure` attribute. Only disable for local plain-HTTP testing.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Returns the cookie name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decrypts the session from the request headers.
    ///
    /// A missing, tampered or undecodable cookie yields an empty session.
    /// The returned jar must be handed back to [`SessionStore::save`].
    #[must_use]
    pub fn load(&self, headers: &HeaderMap) -> (PrivateCookieJar, Session) {
        let jar = PrivateCookieJar::from_headers(headers, self.key.clone());
        let session = match jar.get(&self.name) {
            Some(cookie) => serde_json::from_str(cookie.value()).unwrap_or_else(|e| {
                tracing::debug!(error = %e, "discarding undecodable session");
                Session::default()
            }),
            None => Session::default(),
        };
        (jar, session)
    }

    /// Encrypts `session` into the jar.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::SessionSave` if the session cannot be encoded or
    /// is too large for a cookie.
    pub fn save(
        &self,
        jar: PrivateCookieJar,
        session: &Session,
    ) -> Result<PrivateCookieJar, GatewayError> {
        let payload = serde_json::to_string(session).map_err(|e| GatewayError::SessionSave {
            details: e.to_string(),
        })?;

        let mut cookie = Cookie::build((self.name.clone(), payload))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .max_age(self.max_age);
        if let Some(domain) = &self.domain {
            cookie = cookie.domain(domain.clone());
        }

        let jar = jar.add(cookie);
        let encoded = encoded_len(&jar, &self.name);
        if encoded > MAX_COOKIE_BYTES {
            return Err(GatewayError::SessionSave {
                details: format!("encrypted session cookie is {encoded} bytes"),
            });
        }

        Ok(jar)
    }
}

/// Length of the encrypted `name=value` pair the jar will emit for `name`.
fn encoded_len(jar: &PrivateCookieJar, name: &str) -> usize {
    let prefix = format!("{name}=");
    let response = jar.clone().into_response();
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .filter(|pair| pair.starts_with(&prefix))
        .map(str::len)
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;

    fn store() -> SessionStore {
        SessionStore::new(Key::generate(), "_s42").with_domain("example.com")
    }

    /// Replays the Set-Cookie header of a saved jar as a request Cookie header.
    fn replay(jar: PrivateCookieJar) -> HeaderMap {
        let response = jar.into_response();
        let mut headers = HeaderMap::new();
        for value in response.headers().get_all(axum::http::header::SET_COOKIE) {
            let cookie = Cookie::parse(value.to_str().unwrap().to_string()).unwrap();
            let pair = format!("{}={}", cookie.name(), cookie.value());
            headers.append(COOKIE, pair.parse().unwrap());
        }
        headers
    }

    #[test]
    fn session_keys_match_payload_names() {
        assert_eq!(SessionKey::Authorized.as_str(), "auth");
        assert_eq!(SessionKey::RedirectUrl.as_str(), "redir");
        assert_eq!(SessionKey::State.as_str(), "state");
        assert_eq!(SessionKey::User.as_str(), "user");
    }

    #[test]
    fn new_session_is_not_authorized() {
        assert!(!Session::default().is_authorized());
    }

    #[test]
    fn take_state_removes_it() {
        let mut session = Session::default();
        session.set_state("abc".to_string());
        assert_eq!(session.take_state().as_deref(), Some("abc"));
        assert!(session.take_state().is_none());
        assert!(!session.contains(SessionKey::State));
    }

    #[test]
    fn serialized_payload_uses_short_keys() {
        let mut session = Session::default();
        session.mark_authorized("octocat".to_string());
        session.set_redirect_url("https://app.example.com/".to_string());
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["auth"], true);
        assert_eq!(json["user"], "octocat");
        assert_eq!(json["redir"], "https://app.example.com/");
        assert!(json.get("state").is_none());
    }

    #[test]
    fn saved_session_loads_back() {
        let store = store();
        let (jar, mut session) = store.load(&HeaderMap::new());
        session.mark_authorized("octocat".to_string());
        let jar = store.save(jar, &session).unwrap();

        let (_, loaded) = store.load(&replay(jar));
        assert!(loaded.is_authorized());
        assert_eq!(loaded.user(), Some("octocat"));
    }

    #[test]
    fn cookie_from_another_key_loads_empty() {
        let writer = store();
        let (jar, mut session) = writer.load(&HeaderMap::new());
        session.mark_authorized("mallory".to_string());
        let headers = replay(writer.save(jar, &session).unwrap());

        let reader = SessionStore::new(Key::generate(), "_s42");
        let (_, loaded) = reader.load(&headers);
        assert_eq!(loaded, Session::default());
    }

    #[test]
    fn cookie_carries_configured_attributes() {
        let store = store().with_max_age(Duration::hours(2));
        let (jar, session) = store.load(&HeaderMap::new());
        let response = store.save(jar, &session).unwrap().into_response();
        let header = response
            .headers()
            .get(axum::http::header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let cookie = Cookie::parse(header).unwrap();
        assert_eq!(cookie.name(), "_s42");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(cookie.max_age(), Some(Duration::hours(2)));
    }

    #[test]
    fn session_that_fits_saves() {
        let store = store();
        let (jar, mut session) = store.load(&HeaderMap::new());
        session.set_redirect_url(format!("https://a.example.com/{}", "x".repeat(2000)));
        let jar = store.save(jar, &session).unwrap();
        let encoded = encoded_len(&jar, "_s42");
        assert!(encoded > 2000 && encoded <= MAX_COOKIE_BYTES);
    }

    #[test]
    fn session_too_large_once_encrypted_fails_to_save() {
        let store = store();
        let (jar, mut session) = store.load(&HeaderMap::new());
        session.set_redirect_url(format!("https://a.example.com/{}", "x".repeat(3500)));
        assert!(serde_json::to_string(&session).unwrap().len() < MAX_COOKIE_BYTES);
        let err = store.save(jar, &session).err().unwrap();
        assert!(matches!(err, GatewayError::SessionSave { .. }));
    }
}
