//! Login redirect and OAuth2 callback.
//!
//! A login stores a fresh CSRF token in the session and sends the browser to
//! the provider. The callback consumes that token and the remembered
//! destination, asks the authorizer who the user is, and on success marks the
//! session authorized before redirecting back.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header::LOCATION};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::PrivateCookieJar;
use oauth2::CsrfToken;
use serde::Deserialize;
use std::sync::Arc;

use crate::authorizer::Authorizer;
use crate::error::GatewayError;
use crate::session::{Session, SessionStore};

/// Random bytes in each login state token (before base64url encoding).
const STATE_TOKEN_BYTES: u32 = 32;

/// Query parameters the provider sends to the callback path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// The authentication gateway: session store plus the configured authorizer.
///
/// Cheap to clone; all clones share the same immutable store and authorizer.
#[derive(Clone)]
pub struct AuthGateway {
    sessions: Arc<SessionStore>,
    authorizer: Arc<dyn Authorizer>,
    https: bool,
}

impl AuthGateway {
    /// Creates a gateway whose public scheme is https.
    #[must_use]
    pub fn new(sessions: SessionStore, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            sessions: Arc::new(sessions),
            authorizer,
            https: true,
        }
    }

    /// Sets the scheme assumed for requests whose URI carries none.
    #[must_use]
    pub fn with_https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn authorizer(&self) -> &dyn Authorizer {
        self.authorizer.as_ref()
    }

    /// Returns true if requests without a scheme are assumed to be https.
    #[must_use]
    pub fn https(&self) -> bool {
        self.https
    }

    /// Starts a login: stores a new state token and redirects to the provider.
    ///
    /// The session is saved before the redirect is built so the token
    /// survives the round trip.
    ///
    /// # Errors
    ///
    /// `SessionSave` if the session cannot be written; `LoginUrl` if the
    /// provider URL cannot be built. Either way no redirect is issued.
    pub fn login(
        &self,
        jar: PrivateCookieJar,
        mut session: Session,
    ) -> Result<(PrivateCookieJar, Response), GatewayError> {
        let state = new_state_token();
        session.set_state(state.clone());
        let jar = self.sessions.save(jar, &session)?;

        let url = self
            .authorizer
            .oauth_config()
            .authorization_url(&state)
            .map_err(|details| GatewayError::LoginUrl { details })?;

        tracing::debug!(provider = %self.authorizer.oauth_config().provider, "redirecting to login");
        Ok((jar, found(url.as_str())))
    }

    /// Handles the provider callback for the session in `headers`.
    ///
    /// The session is saved on every path, so the consumed state token and
    /// redirect URL are gone from the client whatever the outcome.
    pub async fn callback(&self, headers: &HeaderMap, params: CallbackParams) -> Response {
        let (jar, mut session) = self.sessions.load(headers);
        let outcome = self.complete_callback(&mut session, params).await;

        let jar = match self.sessions.save(jar, &session) {
            Ok(jar) => jar,
            Err(e) => return e.into_response(),
        };

        match outcome {
            Ok(redirect_url) => (jar, found(&redirect_url)).into_response(),
            Err(e) => (jar, e).into_response(),
        }
    }

    async fn complete_callback(
        &self,
        session: &mut Session,
        params: CallbackParams,
    ) -> Result<String, GatewayError> {
        session.clear_authorized();
        let stored_state = session.take_state();
        let redirect_url = session.take_redirect_url();

        let code = params
            .code
            .filter(|code| !code.is_empty())
            .ok_or(GatewayError::MissingCode)?;

        match (stored_state, params.state) {
            (Some(stored), Some(given)) if !stored.is_empty() && stored == given => {}
            _ => return Err(GatewayError::MissingState),
        }

        let user = self.authorizer.authorize(&code).await.map_err(|e| {
            tracing::warn!(error = %e, "authorization failed");
            GatewayError::Unauthorized
        })?;

        tracing::info!(user = %user, "user authorized");
        session.mark_authorized(user);

        redirect_url
            .filter(|url| !url.is_empty())
            .ok_or(GatewayError::MissingRedirectUrl)
    }
}

/// Axum handler for the fixed callback path.
///
/// An unparseable query still goes through the callback so the session is
/// cleaned up; it fails as a missing code.
pub async fn callback(
    State(gateway): State<AuthGateway>,
    headers: HeaderMap,
    query: Result<Query<CallbackParams>, QueryRejection>,
) -> Response {
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "malformed callback query");
            CallbackParams::default()
        }
    };
    gateway.callback(&headers, params).await
}

/// Generates a single-use, base64url-encoded CSRF token.
fn new_state_token() -> String {
    CsrfToken::new_random_len(STATE_TOKEN_BYTES).secret().clone()
}

/// A 302 redirect to `location`.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthorizerError;
    use crate::session::SessionKey;
    use crate::testing::{Browser, FakeAuthorizer, session_from, state_param};
    use axum::Router;
    use axum::routing::get;

    fn router(gateway: AuthGateway) -> Router {
        Router::new()
            .route("/authorized", get(callback))
            .with_state(gateway)
    }

    /// Seeds a browser with a session holding `state` and a redirect URL.
    fn pending_login(gateway: &AuthGateway, state: &str) -> Browser {
        let (jar, mut session) = gateway.sessions().load(&HeaderMap::new());
        session.set_state(state.to_string());
        session.set_redirect_url("https://app.example.com/dash".to_string());
        let jar = gateway.sessions().save(jar, &session).unwrap();
        Browser::from_jar(jar)
    }

    #[test]
    fn state_tokens_are_long_and_distinct() {
        let a = new_state_token();
        let b = new_state_token();
        assert_ne!(a, b);
        // 32 bytes base64url-encoded without padding
        assert_eq!(a.len(), 43);
        assert!(!a.contains('+') && !a.contains('/'));
    }

    #[test]
    fn login_saves_state_and_redirects() {
        let gateway = FakeAuthorizer::gateway(Ok("octocat".to_string()));
        let (jar, session) = gateway.sessions().load(&HeaderMap::new());
        let (jar, response) = gateway.login(jar, session).unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        let state = state_param(&response);
        let mut saved = session_from(&gateway, &Browser::from_jar(jar).headers());
        assert_eq!(saved.take_state(), Some(state));
    }

    #[test]
    fn login_fails_without_redirect_when_session_cannot_be_saved() {
        let gateway = FakeAuthorizer::gateway(Ok("octocat".to_string()));
        let (jar, mut session) = gateway.sessions().load(&HeaderMap::new());
        session.set_redirect_url(format!("https://app.example.com/{}", "x".repeat(3500)));
        let err = gateway.login(jar, session).err().unwrap();
        assert!(matches!(err, GatewayError::SessionSave { .. }));
    }

    #[tokio::test]
    async fn valid_callback_authorizes_and_redirects() {
        let gateway = FakeAuthorizer::gateway(Ok("octocat".to_string()));
        let mut browser = pending_login(&gateway, "tok");

        let response = browser
            .get(router(gateway.clone()), "oauth.example.com", "/authorized?code=c&state=tok")
            .await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[LOCATION].to_str().unwrap(),
            "https://app.example.com/dash"
        );
        let session = session_from(&gateway, &browser.headers());
        assert!(session.is_authorized());
        assert_eq!(session.user(), Some("octocat"));
        assert!(!session.contains(SessionKey::State));
        assert!(!session.contains(SessionKey::RedirectUrl));
    }

    #[tokio::test]
    async fn missing_code_is_bad_request_even_with_valid_state() {
        let gateway = FakeAuthorizer::gateway(Ok("octocat".to_string()));
        let mut browser = pending_login(&gateway, "tok");

        let response = browser
            .get(router(gateway.clone()), "oauth.example.com", "/authorized?state=tok")
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!session_from(&gateway, &browser.headers()).is_authorized());
    }

    #[tokio::test]
    async fn missing_code_is_bad_request_with_mismatched_state() {
        let gateway = FakeAuthorizer::gateway(Ok("octocat".to_string()));
        let mut browser = pending_login(&gateway, "tok");

        let response = browser
            .get(router(gateway.clone()), "oauth.example.com", "/authorized?state=other")
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let session = session_from(&gateway, &browser.headers());
        assert!(!session.is_authorized());
        assert!(!session.contains(SessionKey::State));
        assert!(!session.contains(SessionKey::RedirectUrl));
    }

    #[tokio::test]
    async fn missing_code_is_bad_request_without_stored_state() {
        let gateway = FakeAuthorizer::gateway(Ok("octocat".to_string()));
        let (jar, mut session) = gateway.sessions().load(&HeaderMap::new());
        session.set_redirect_url("https://app.example.com/dash".to_string());
        let mut browser = Browser::from_jar(gateway.sessions().save(jar, &session).unwrap());

        let response = browser
            .get(router(gateway.clone()), "oauth.example.com", "/authorized?state=tok")
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let session = session_from(&gateway, &browser.headers());
        assert!(!session.contains(SessionKey::State));
        assert!(!session.contains(SessionKey::RedirectUrl));
    }

    #[tokio::test]
    async fn malformed_query_still_clears_session() {
        let gateway = FakeAuthorizer::gateway(Ok("octocat".to_string()));
        let (jar, mut session) = gateway.sessions().load(&HeaderMap::new());
        session.mark_authorized("octocat".to_string());
        session.set_state("tok".to_string());
        session.set_redirect_url("https://app.example.com/dash".to_string());
        let mut browser = Browser::from_jar(gateway.sessions().save(jar, &session).unwrap());

        let response = browser
            .get(
                router(gateway.clone()),
                "oauth.example.com",
                "/authorized?code=a&code=b&state=tok",
            )
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let session = session_from(&gateway, &browser.headers());
        assert!(!session.is_authorized());
        assert!(!session.contains(SessionKey::State));
        assert!(!session.contains(SessionKey::RedirectUrl));

        // The consumed token cannot be used afterwards.
        let retry = browser
            .get(router(gateway.clone()), "oauth.example.com", "/authorized?code=a&state=tok")
            .await;
        assert_eq!(retry.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn mismatched_state_is_rejected_and_consumed() {
        let gateway = FakeAuthorizer::gateway(Ok("octocat".to_string()));
        let mut browser = pending_login(&gateway, "tok");

        let response = browser
            .get(router(gateway.clone()), "oauth.example.com", "/authorized?code=c&state=other")
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let session = session_from(&gateway, &browser.headers());
        assert!(!session.is_authorized());
        assert!(!session.contains(SessionKey::State));

        // The original token is gone, so the legitimate value fails too.
        let retry = browser
            .get(router(gateway.clone()), "oauth.example.com", "/authorized?code=c&state=tok")
            .await;
        assert_eq!(retry.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn callback_without_stored_state_is_rejected() {
        let gateway = FakeAuthorizer::gateway(Ok("octocat".to_string()));
        let mut browser = Browser::default();

        let response = browser
            .get(router(gateway.clone()), "oauth.example.com", "/authorized?code=c&state=tok")
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!session_from(&gateway, &browser.headers()).is_authorized());
    }

    #[tokio::test]
    async fn replayed_state_fails_the_second_time() {
        let gateway = FakeAuthorizer::gateway(Ok("octocat".to_string()));
        let mut browser = pending_login(&gateway, "tok");
        let app = router(gateway.clone());

        let first = browser
            .get(app.clone(), "oauth.example.com", "/authorized?code=c&state=tok")
            .await;
        assert_eq!(first.status(), StatusCode::FOUND);

        let second = browser
            .get(app, "oauth.example.com", "/authorized?code=c&state=tok")
            .await;
        assert_eq!(second.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!session_from(&gateway, &browser.headers()).is_authorized());
    }

    #[tokio::test]
    async fn rejected_user_gets_401_and_clean_session() {
        let gateway = FakeAuthorizer::gateway(Err(AuthorizerError::Unauthorized {
            user: "mallory".to_string(),
            reason: "not a member".to_string(),
        }));
        let mut browser = pending_login(&gateway, "tok");

        let response = browser
            .get(router(gateway.clone()), "oauth.example.com", "/authorized?code=c&state=tok")
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let session = session_from(&gateway, &browser.headers());
        assert!(!session.is_authorized());
        assert!(!session.contains(SessionKey::User));
        assert!(!session.contains(SessionKey::State));
        assert!(!session.contains(SessionKey::RedirectUrl));
    }

    #[tokio::test]
    async fn upstream_failure_is_reported_as_unauthorized() {
        let gateway = FakeAuthorizer::gateway(Err(AuthorizerError::Upstream {
            provider: "github".to_string(),
            details: "timeout".to_string(),
        }));
        let mut browser = pending_login(&gateway, "tok");

        let response = browser
            .get(router(gateway.clone()), "oauth.example.com", "/authorized?code=c&state=tok")
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_redirect_url_is_server_error() {
        let gateway = FakeAuthorizer::gateway(Ok("octocat".to_string()));
        let (jar, mut session) = gateway.sessions().load(&HeaderMap::new());
        session.set_state("tok".to_string());
        let mut browser = Browser::from_jar(gateway.sessions().save(jar, &session).unwrap());

        let response = browser
            .get(router(gateway.clone()), "oauth.example.com", "/authorized?code=c&state=tok")
            .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // The identity exchange itself succeeded.
        assert!(session_from(&gateway, &browser.headers()).is_authorized());
    }
}
