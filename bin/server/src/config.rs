//! Centralized server configuration.
//!
//! Loaded via the `config` crate from an optional file named by
//! `GATEHOUSE_CONFIG`, overlaid with `GATEHOUSE__*` environment variables
//! (`__` separates nesting levels, e.g. `GATEHOUSE__SESSION__MAX_AGE_HOURS`).
//!
//! The authorizer section is passed through undecoded; see
//! [`AuthorizerConfig`](gatehouse_auth::AuthorizerConfig).

use axum_extra::extract::cookie::Key;
use base64::Engine;
use gatehouse_auth::{AuthorizerConfig, SessionStore};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::StartupError;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "GATEHOUSE_CONFIG";

/// Server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Base domain. The callback is served on `oauth.<domain>`, the health
    /// check on `health.<domain>`, and backends on `<name>.<domain>`.
    pub domain: String,

    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Whether clients reach the gateway over https.
    #[serde(default = "default_https")]
    pub https: bool,

    /// Session cookie configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Identity provider selection.
    pub authorizer: AuthorizerConfig,

    /// Backends by subdomain name.
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime in hours, enforced through the cookie max age.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,

    /// Cookie name. A random name is generated when unset.
    #[serde(default)]
    pub name: Option<String>,

    /// Base64-encoded 64-byte encryption key. Generated at startup when
    /// unset, which invalidates all sessions on restart.
    #[serde(default)]
    pub key: Option<String>,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

/// A proxied backend.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL requests are forwarded to.
    pub url: String,

    /// Whether requests need an authorized session.
    #[serde(default = "default_backend_auth")]
    pub auth: bool,

    /// Path probed by the health check; the backend is skipped when unset.
    #[serde(default)]
    pub health_check: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_https() -> bool {
    true
}

fn default_max_age_hours() -> i64 {
    24
}

fn default_secure_cookies() -> bool {
    true
}

fn default_backend_auth() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_hours: default_max_age_hours(),
            name: None,
            key: None,
            secure_cookies: default_secure_cookies(),
        }
    }
}

impl SessionConfig {
    /// Builds the session store scoped to `domain`.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::SessionKey` if the configured key is not valid
    /// base64 or is shorter than 64 bytes.
    pub fn store(&self, domain: &str) -> Result<SessionStore, StartupError> {
        let key = match &self.key {
            Some(encoded) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| StartupError::SessionKey {
                        details: e.to_string(),
                    })?;
                Key::try_from(bytes.as_slice()).map_err(|e| StartupError::SessionKey {
                    details: e.to_string(),
                })?
            }
            None => {
                tracing::warn!("no session key configured, sessions will not survive a restart");
                Key::generate()
            }
        };

        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("_s{}", rand::random::<u32>()));

        Ok(SessionStore::new(key, name)
            .with_domain(domain)
            .with_max_age(time::Duration::hours(self.max_age_hours))
            .with_secure(self.secure_cookies))
    }
}

impl ServerConfig {
    /// Loads configuration from `GATEHOUSE_CONFIG` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            builder = builder.add_source(config::File::with_name(&path));
        }
        builder
            .add_source(
                config::Environment::with_prefix("GATEHOUSE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Loads configuration from a single file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or invalid.
    pub fn from_file(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()
    }
}
