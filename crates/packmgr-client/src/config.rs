//! Centralized configuration for the package manager client.
//!
//! `PackmgrConfig` holds the fixed protocol constants of the service.
//! `ClientConfig` is the per-client configuration (base URL, credentials,
//! timeouts) that transports and the client core are built from.

use crate::{PackmgrError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Protocol-level constants.
pub struct PackmgrConfig;

impl PackmgrConfig {
    pub const HTML_SERVICE_PATH: &'static str = "/crx/packmgr/service/console.html";
    pub const JSON_SERVICE_PATH: &'static str = "/crx/packmgr/service/exec.json";
    pub const PACKAGE_ROOT: &'static str = "/etc/packages";
    pub const PACKAGE_EXTENSION: &'static str = ".zip";
    pub const MIME_ZIP: &'static str = "application/zip";

    /// Default base URL of a local development server.
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:4502";
    /// Placeholder credentials accepted by default local test servers only.
    pub const DEFAULT_USERNAME: &'static str = "admin";
    pub const DEFAULT_PASSWORD: &'static str = "admin";

    /// Smallest accepted autosave threshold for `install`.
    pub const MIN_AUTOSAVE: u32 = 1024;

    /// Backoff ceiling between availability probes.
    pub const MAX_PROBE_BACKOFF: Duration = Duration::from_secs(5);

    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const USER_AGENT: &'static str = "packmgr-client/0.6";
}

/// HTTP Basic credentials, always sent preemptively.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(PackmgrConfig::DEFAULT_USERNAME, PackmgrConfig::DEFAULT_PASSWORD)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Per-client configuration.
///
/// The defaults target a local development server with placeholder
/// credentials; production callers are expected to override both.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub connect_timeout_secs: u64,
    /// Overall timeout for command requests. `None` lets long installs run.
    pub request_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: PackmgrConfig::DEFAULT_BASE_URL.to_string(),
            username: PackmgrConfig::DEFAULT_USERNAME.to_string(),
            password: PackmgrConfig::DEFAULT_PASSWORD.to_string(),
            connect_timeout_secs: PackmgrConfig::CONNECT_TIMEOUT.as_secs(),
            request_timeout_secs: None,
        }
    }
}

impl ClientConfig {
    pub const ENV_BASE_URL: &'static str = "PACKMGR_BASE_URL";
    pub const ENV_USERNAME: &'static str = "PACKMGR_USERNAME";
    pub const ENV_PASSWORD: &'static str = "PACKMGR_PASSWORD";
    pub const ENV_REQUEST_TIMEOUT_SECS: &'static str = "PACKMGR_REQUEST_TIMEOUT_SECS";

    /// Defaults overridden by `PACKMGR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(base_url) = lookup(Self::ENV_BASE_URL) {
            config.base_url = base_url;
        }
        if let Some(username) = lookup(Self::ENV_USERNAME) {
            config.username = username;
        }
        if let Some(password) = lookup(Self::ENV_PASSWORD) {
            config.password = password;
        }
        if let Some(secs) = lookup(Self::ENV_REQUEST_TIMEOUT_SECS) {
            let secs = secs.trim().parse::<u64>().map_err(|e| PackmgrError::Config {
                message: format!("{} must be a number of seconds: {}", Self::ENV_REQUEST_TIMEOUT_SECS, e),
            })?;
            config.request_timeout_secs = Some(secs);
        }

        Ok(config)
    }

    /// Parse a configuration from a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PackmgrError::Config {
            message: format!("Invalid client configuration: {}", e),
        })
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Strip every trailing `/` and check the result is an absolute http(s) URL.
pub fn normalize_base_url(base_url: &str) -> Result<String> {
    let trimmed = base_url.trim_end_matches('/');

    let parsed = url::Url::parse(trimmed)
        .map_err(|e| PackmgrError::invalid_argument("base_url", format!("{}: {}", trimmed, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PackmgrError::invalid_argument(
            "base_url",
            format!("unsupported scheme {}", parsed.scheme()),
        ));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_normalize_strips_all_trailing_slashes() {
        assert_eq!(
            normalize_base_url("http://localhost:4502///").unwrap(),
            "http://localhost:4502"
        );
        assert_eq!(
            normalize_base_url("https://author.example.com/ctx/").unwrap(),
            "https://author.example.com/ctx"
        );
    }

    #[test]
    fn test_normalize_rejects_non_http() {
        assert!(normalize_base_url("ftp://localhost").is_err());
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::new("deployer", "s3cret"));
        assert!(debug.contains("deployer"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_from_lookup_overrides_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PACKMGR_BASE_URL", "http://author:4502"),
            ("PACKMGR_PASSWORD", "hunter2"),
            ("PACKMGR_REQUEST_TIMEOUT_SECS", "120"),
        ]);
        let config = ClientConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.base_url, "http://author:4502");
        assert_eq!(config.username, PackmgrConfig::DEFAULT_USERNAME);
        assert_eq!(config.password, "hunter2");
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_from_lookup_rejects_bad_timeout() {
        let result = ClientConfig::from_lookup(|k| {
            (k == "PACKMGR_REQUEST_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(PackmgrError::Config { .. })));
    }

    #[test]
    fn test_from_json_keeps_defaults() {
        let config = ClientConfig::from_json(r#"{"base_url": "http://publish:4503"}"#).unwrap();
        assert_eq!(config.base_url, "http://publish:4503");
        assert_eq!(config.credentials(), Credentials::default());
        assert_eq!(config.connect_timeout(), PackmgrConfig::CONNECT_TIMEOUT);
    }
}
