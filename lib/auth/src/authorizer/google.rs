//! Google account authorizer matching the verified email against a pattern.

use async_trait::async_trait;
use regex::Regex;
use rootcause::prelude::Report;
use serde::Deserialize;
use tracing::instrument;

use super::{Authorizer, ConfigurableAuthorizer, OAuthClientConfig, provider_http_client};
use crate::error::AuthorizerError;

/// Registry name for this authorizer.
pub const TYPE_NAME: &str = "google-regex";

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

const GOOGLE_SCOPES: &[&str] = &["openid", "email"];

/// Configuration for [`GoogleRegexAuthorizer`].
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleRegexConfig {
    #[serde(rename = "ClientID", alias = "clientid", alias = "client_id")]
    pub client_id: String,
    #[serde(rename = "ClientSecret", alias = "clientsecret", alias = "client_secret")]
    pub client_secret: String,
    /// Regular expression a verified email must match (unanchored).
    #[serde(rename = "EmailPattern", alias = "emailpattern", alias = "email_pattern")]
    pub email_pattern: String,
    #[serde(
        rename = "RedirectURL",
        alias = "redirecturl",
        alias = "redirect_url",
        default
    )]
    pub redirect_url: Option<String>,
    #[serde(
        rename = "AuthURL",
        alias = "authurl",
        alias = "auth_url",
        default = "default_auth_url"
    )]
    pub auth_url: String,
    #[serde(
        rename = "TokenURL",
        alias = "tokenurl",
        alias = "token_url",
        default = "default_token_url"
    )]
    pub token_url: String,
    #[serde(
        rename = "UserInfoURL",
        alias = "userinfourl",
        alias = "userinfo_url",
        default = "default_userinfo_url"
    )]
    pub userinfo_url: String,
}

fn default_auth_url() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

fn default_userinfo_url() -> String {
    GOOGLE_USERINFO_URL.to_string()
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

/// Admits Google accounts whose verified email matches a pattern.
///
/// The identity returned on success is the email address.
pub struct GoogleRegexAuthorizer {
    oauth: OAuthClientConfig,
    email_pattern: Regex,
    userinfo_url: String,
    http: reqwest::Client,
}

impl GoogleRegexAuthorizer {
    /// Returns true if `email` is admitted by the configured pattern.
    #[must_use]
    pub fn admits(&self, email: &str) -> bool {
        self.email_pattern.is_match(email)
    }

    async fn userinfo(&self, token: &str) -> Result<UserInfo, AuthorizerError> {
        self.http
            .get(&self.userinfo_url)
            .bearer_auth(token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| self.oauth.upstream(format!("userinfo request failed: {e}")))?
            .json()
            .await
            .map_err(|e| self.oauth.upstream(format!("userinfo returned bad JSON: {e}")))
    }
}

impl ConfigurableAuthorizer for GoogleRegexAuthorizer {
    type Config = GoogleRegexConfig;

    fn from_config(config: GoogleRegexConfig) -> Result<Self, String> {
        let email_pattern = Regex::new(&config.email_pattern)
            .map_err(|e| format!("invalid email pattern: {e}"))?;

        let oauth = OAuthClientConfig {
            provider: "google".to_string(),
            client_id: config.client_id,
            client_secret: config.client_secret,
            auth_url: config.auth_url,
            token_url: config.token_url,
            redirect_url: config.redirect_url,
            scopes: GOOGLE_SCOPES.iter().map(|s| (*s).to_string()).collect(),
        };
        oauth.validate()?;

        Ok(Self {
            oauth,
            email_pattern,
            userinfo_url: config.userinfo_url,
            http: provider_http_client()?,
        })
    }
}

#[async_trait]
impl Authorizer for GoogleRegexAuthorizer {
    fn oauth_config(&self) -> &OAuthClientConfig {
        &self.oauth
    }

    #[instrument(skip_all)]
    async fn authorize(&self, code: &str) -> Result<String, Report<AuthorizerError>> {
        let token = self.oauth.exchange_code(&self.http, code).await?;
        let info = self.userinfo(&token).await?;

        let Some(email) = info.email else {
            return Err(AuthorizerError::Unauthorized {
                user: String::new(),
                reason: "account has no email address".to_string(),
            }
            .into());
        };

        if !info.email_verified {
            return Err(AuthorizerError::Unauthorized {
                user: email,
                reason: "email address is not verified".to_string(),
            }
            .into());
        }

        if !self.admits(&email) {
            return Err(AuthorizerError::Unauthorized {
                user: email,
                reason: "email does not match the allowed pattern".to_string(),
            }
            .into());
        }

        tracing::debug!(user = %email, "email pattern matched");
        Ok(email)
    }
}
