//! GitHub organization membership authorizer.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, LINK};
use rootcause::prelude::Report;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::instrument;

use super::{Authorizer, ConfigurableAuthorizer, OAuthClientConfig, provider_http_client};
use crate::error::AuthorizerError;

/// Registry name for this authorizer.
pub const TYPE_NAME: &str = "github-org";

const GITHUB_AUTH_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_API_URL: &str = "https://api.github.com";

/// Scope needed to list the user's organization memberships.
const GITHUB_SCOPES: &[&str] = &["read:org"];

/// Upper bound on `/user/orgs` pages fetched per login.
const MAX_ORG_PAGES: usize = 50;

/// Configuration for [`GithubOrgAuthorizer`].
#[derive(Debug, Clone, Deserialize)]
pub struct GithubOrgConfig {
    #[serde(rename = "ClientID", alias = "clientid", alias = "client_id")]
    pub client_id: String,
    #[serde(rename = "ClientSecret", alias = "clientsecret", alias = "client_secret")]
    pub client_secret: String,
    /// Numeric id of the organization users must belong to.
    #[serde(rename = "OrgID", alias = "orgid", alias = "org_id")]
    pub org_id: u64,
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
        rename = "APIURL",
        alias = "apiurl",
        alias = "api_url",
        default = "default_api_url"
    )]
    pub api_url: String,
}

fn default_auth_url() -> String {
    GITHUB_AUTH_URL.to_string()
}

fn default_token_url() -> String {
    GITHUB_TOKEN_URL.to_string()
}

fn default_api_url() -> String {
    GITHUB_API_URL.to_string()
}

/// Admits users who are members of one GitHub organization.
///
/// The identity returned on success is the user's GitHub login.
pub struct GithubOrgAuthorizer {
    oauth: OAuthClientConfig,
    org_id: u64,
    api_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GithubOrg {
    id: u64,
}

impl GithubOrgAuthorizer {
    async fn get_json<T: DeserializeOwned>(
        &self,
        token: &str,
        url: &str,
    ) -> Result<(T, Option<String>), AuthorizerError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| self.oauth.upstream(format!("GET {url} failed: {e}")))?;
        let next = response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .and_then(next_page);
        let body = response
            .json()
            .await
            .map_err(|e| self.oauth.upstream(format!("GET {url} returned bad JSON: {e}")))?;
        Ok((body, next))
    }

    fn is_api_url(&self, url: &str) -> bool {
        url.strip_prefix(self.api_url.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Walks `/user/orgs` page by page until the configured org shows up.
    async fn is_member(&self, token: &str) -> Result<bool, AuthorizerError> {
        let mut url = format!("{}/user/orgs?per_page=100", self.api_url);
        for _ in 0..MAX_ORG_PAGES {
            let (orgs, next): (Vec<GithubOrg>, _) = self.get_json(token, &url).await?;
            if orgs.iter().any(|org| org.id == self.org_id) {
                return Ok(true);
            }
            match next {
                Some(next) if self.is_api_url(&next) => url = next,
                Some(next) => {
                    return Err(self
                        .oauth
                        .upstream(format!("refusing to follow pagination to {next}")));
                }
                None => return Ok(false),
            }
        }
        tracing::warn!(pages = MAX_ORG_PAGES, "gave up paging through organizations");
        Ok(false)
    }
}

/// Extracts the `rel="next"` target from a `Link` header.
fn next_page(link: &str) -> Option<String> {
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        params
            .split(';')
            .any(|param| param.trim() == r#"rel="next""#)
            .then(|| {
                target
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string()
            })
    })
}

impl ConfigurableAuthorizer for GithubOrgAuthorizer {
    type Config = GithubOrgConfig;

    fn from_config(config: GithubOrgConfig) -> Result<Self, String> {
        let oauth = OAuthClientConfig {
            provider: "github".to_string(),
            client_id: config.client_id,
            client_secret: config.client_secret,
            auth_url: config.auth_url,
            token_url: config.token_url,
            redirect_url: config.redirect_url,
            scopes: GITHUB_SCOPES.iter().map(|s| (*s).to_string()).collect(),
        };
        oauth.validate()?;

        Ok(Self {
            oauth,
            org_id: config.org_id,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            http: provider_http_client()?,
        })
    }
}

#[async_trait]
impl Authorizer for GithubOrgAuthorizer {
    fn oauth_config(&self) -> &OAuthClientConfig {
        &self.oauth
    }

    #[instrument(skip_all, fields(org_id = self.org_id))]
    async fn authorize(&self, code: &str) -> Result<String, Report<AuthorizerError>> {
        let token = self.oauth.exchange_code(&self.http, code).await?;

        let (user, _): (GithubUser, _) = self
            .get_json(&token, &format!("{}/user", self.api_url))
            .await?;

        if self.is_member(&token).await? {
            tracing::debug!(user = %user.login, "organization membership confirmed");
            Ok(user.login)
        } else {
            Err(AuthorizerError::Unauthorized {
                user: user.login,
                reason: format!("not a member of organization {}", self.org_id),
            }
            .into())
        }
    }
}
