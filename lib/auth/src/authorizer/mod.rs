//! Pluggable identity-provider strategies.
//!
//! An [`Authorizer`] knows how to describe its provider's OAuth2 client and
//! how to turn an authorization code into a user identity. Implementations
//! are selected at startup by type name through an [`AuthorizerRegistry`].

pub mod github;
pub mod google;

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::url::Url;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope,
    TokenResponse, TokenUrl,
};
use rootcause::prelude::Report;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AuthorizerError;

pub use github::{GithubOrgAuthorizer, GithubOrgConfig};
pub use google::{GoogleRegexAuthorizer, GoogleRegexConfig};

/// User agent sent on every provider call.
const USER_AGENT: &str = concat!("gatehouse/", env!("CARGO_PKG_VERSION"));

/// An identity provider the gateway can log users in with.
///
/// Instances are immutable after construction and shared across requests.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// OAuth2 client descriptor used to build the login redirect.
    fn oauth_config(&self) -> &OAuthClientConfig;

    /// Exchanges `code` for an access token and resolves the user identity.
    ///
    /// # Errors
    ///
    /// `AuthorizerError::Unauthorized` if the user fails the provider policy,
    /// `AuthorizerError::Upstream` on transport or provider failure.
    async fn authorize(&self, code: &str) -> Result<String, Report<AuthorizerError>>;
}

/// An authorizer that can be built from a decoded configuration value.
pub trait ConfigurableAuthorizer: Authorizer + Sized + 'static {
    /// The configuration shape for this authorizer type.
    type Config: DeserializeOwned;

    /// Builds the authorizer, validating the decoded configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of why the configuration is unusable.
    fn from_config(config: Self::Config) -> Result<Self, String>;
}

/// OAuth2 client settings for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClientConfig {
    /// Short provider name used in logs and errors.
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_url: Option<String>,
    pub scopes: Vec<String>,
}

impl OAuthClientConfig {
    /// Checks that every endpoint is a valid URL.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid URL.
    pub fn validate(&self) -> Result<(), String> {
        AuthUrl::new(self.auth_url.clone()).map_err(|e| format!("invalid auth URL: {e}"))?;
        TokenUrl::new(self.token_url.clone()).map_err(|e| format!("invalid token URL: {e}"))?;
        if let Some(redirect_url) = &self.redirect_url {
            RedirectUrl::new(redirect_url.clone())
                .map_err(|e| format!("invalid redirect URL: {e}"))?;
        }
        Ok(())
    }

    /// Builds the provider login URL carrying `state` as the CSRF token.
    ///
    /// Offline access is always requested.
    ///
    /// # Errors
    ///
    /// Returns a description if a configured URL is invalid.
    pub fn authorization_url(&self, state: &str) -> Result<Url, String> {
        let auth_url =
            AuthUrl::new(self.auth_url.clone()).map_err(|e| format!("invalid auth URL: {e}"))?;
        let mut client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_uri(auth_url);
        if let Some(redirect_url) = &self.redirect_url {
            let redirect_url = RedirectUrl::new(redirect_url.clone())
                .map_err(|e| format!("invalid redirect URL: {e}"))?;
            client = client.set_redirect_uri(redirect_url);
        }

        let (url, _) = client
            .authorize_url(|| CsrfToken::new(state.to_string()))
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .add_extra_param("access_type", "offline")
            .url();

        Ok(url)
    }

    /// Exchanges an authorization code for an access token.
    ///
    /// # Errors
    ///
    /// Returns `AuthorizerError::Upstream` if the token endpoint call fails.
    pub async fn exchange_code(
        &self,
        http: &reqwest::Client,
        code: &str,
    ) -> Result<String, Report<AuthorizerError>> {
        let token_url = TokenUrl::new(self.token_url.clone())
            .map_err(|e| self.upstream(format!("invalid token URL: {e}")))?;
        let mut client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(token_url);
        if let Some(redirect_url) = &self.redirect_url {
            let redirect_url = RedirectUrl::new(redirect_url.clone())
                .map_err(|e| self.upstream(format!("invalid redirect URL: {e}")))?;
            client = client.set_redirect_uri(redirect_url);
        }

        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(http)
            .await
            .map_err(|e| self.upstream(format!("token exchange failed: {e}")))?;

        Ok(token.access_token().secret().clone())
    }

    /// Builds an upstream error attributed to this provider.
    pub(crate) fn upstream(&self, details: String) -> AuthorizerError {
        AuthorizerError::Upstream {
            provider: self.provider.clone(),
            details,
        }
    }
}

/// Builds the HTTP client used for provider calls.
///
/// Redirects are not followed: token and API endpoints never legitimately
/// redirect.
pub(crate) fn provider_http_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| format!("failed to create HTTP client: {e}"))
}

/// Type name plus opaque configuration, as read from process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizerConfig {
    /// Registered authorizer type, e.g. `github-org` or `google-regex`.
    #[serde(rename = "type", alias = "Type")]
    pub type_name: String,
    /// Type-specific settings, decoded only by the selected authorizer.
    #[serde(default, alias = "Config")]
    pub config: serde_json::Value,
}

/// Builds an authorizer from a decoded configuration value.
pub type Constructor =
    fn(&str, serde_json::Value) -> Result<Arc<dyn Authorizer>, Report<AuthorizerError>>;

/// Maps authorizer type names to constructors.
pub struct AuthorizerRegistry {
    constructors: HashMap<String, Constructor>,
}

impl Default for AuthorizerRegistry {
    /// A registry with the built-in `github-org` and `google-regex` types.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register::<GithubOrgAuthorizer>(github::TYPE_NAME);
        registry.register::<GoogleRegexAuthorizer>(google::TYPE_NAME);
        registry
    }
}

impl AuthorizerRegistry {
    /// A registry with no types registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers `T` under `type_name`, replacing any earlier registration.
    pub fn register<T: ConfigurableAuthorizer>(&mut self, type_name: impl Into<String>) {
        self.constructors
            .insert(type_name.into(), construct_as::<T> as Constructor);
    }

    /// Returns the registered type names, sorted.
    #[must_use]
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Builds an authorizer from a type name and raw JSON configuration bytes.
    ///
    /// # Errors
    ///
    /// `UnknownType` if nothing is registered under `type_name`;
    /// `ConfigDecode` if the bytes do not decode into the type's shape.
    pub fn construct(
        &self,
        type_name: &str,
        config: &[u8],
    ) -> Result<Arc<dyn Authorizer>, Report<AuthorizerError>> {
        let constructor = self.lookup(type_name)?;
        let value: serde_json::Value =
            serde_json::from_slice(config).map_err(|e| AuthorizerError::ConfigDecode {
                type_name: type_name.to_string(),
                details: e.to_string(),
            })?;
        constructor(type_name, value)
    }

    /// Builds an authorizer from already-loaded configuration.
    ///
    /// # Errors
    ///
    /// Same as [`AuthorizerRegistry::construct`].
    pub fn from_config(
        &self,
        config: &AuthorizerConfig,
    ) -> Result<Arc<dyn Authorizer>, Report<AuthorizerError>> {
        let constructor = self.lookup(&config.type_name)?;
        constructor(&config.type_name, config.config.clone())
    }

    fn lookup(&self, type_name: &str) -> Result<Constructor, AuthorizerError> {
        self.constructors
            .get(type_name)
            .copied()
            .ok_or_else(|| AuthorizerError::UnknownType {
                type_name: type_name.to_string(),
            })
    }
}

fn construct_as<T: ConfigurableAuthorizer>(
    type_name: &str,
    value: serde_json::Value,
) -> Result<Arc<dyn Authorizer>, Report<AuthorizerError>> {
    let decode_error = |details: String| AuthorizerError::ConfigDecode {
        type_name: type_name.to_string(),
        details,
    };
    let config: T::Config = serde_json::from_value(value).map_err(|e| decode_error(e.to_string()))?;
    let authorizer = T::from_config(config).map_err(decode_error)?;
    tracing::debug!(authorizer = type_name, "constructed authorizer");
    Ok(Arc::new(authorizer))
}
