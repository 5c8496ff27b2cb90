use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::error::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Storefront client configuration.
///
/// The API base URL is the only required value and is a constructor
/// parameter. Use [`from_env()`](ClientConfig::from_env) for convention-based
/// setup, or [`new()`](ClientConfig::new) with `with_*` methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    api_base_url: Url,
    request_timeout: Duration,
    state_dir: Option<PathBuf>,
    login_path: String,
    home_path: String,
}

impl ClientConfig {
    #[must_use]
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            request_timeout: DEFAULT_TIMEOUT,
            state_dir: None,
            login_path: "/auth".into(),
            home_path: "/".into(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `STOREFRONT_API_URL`: base URL of the storefront API
    ///
    /// # Optional env vars
    /// - `STOREFRONT_TIMEOUT_SECS`: per-request timeout in seconds
    /// - `STOREFRONT_STATE_DIR`: directory for persisted session and theme;
    ///   in-memory when unset
    /// - `STOREFRONT_LOGIN_PATH`: login page (default `/auth`)
    /// - `STOREFRONT_HOME_PATH`: home page (default `/`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is missing or any value is invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let raw_url = var("STOREFRONT_API_URL")
            .ok_or_else(|| Error::Config("STOREFRONT_API_URL is required".into()))?;
        let api_base_url: Url = raw_url
            .parse()
            .map_err(|e| Error::Config(format!("STOREFRONT_API_URL: {e}")))?;

        let mut config = Self::new(api_base_url);

        if let Some(secs) = var("STOREFRONT_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("STOREFRONT_TIMEOUT_SECS: {e}")))?;
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        if let Some(dir) = var("STOREFRONT_STATE_DIR").filter(|d| !d.trim().is_empty()) {
            config = config.with_state_dir(dir);
        }
        if let Some(path) = var("STOREFRONT_LOGIN_PATH") {
            config = config.with_login_path(local_path("STOREFRONT_LOGIN_PATH", path)?);
        }
        if let Some(path) = var("STOREFRONT_HOME_PATH") {
            config = config.with_home_path(local_path("STOREFRONT_HOME_PATH", path)?);
        }
        Ok(config)
    }

    /// Override the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Persist session and theme under `dir` instead of in memory.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Override the login page unauthenticated users are sent to.
    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Override the page users without permission are sent to.
    #[must_use]
    pub fn with_home_path(mut self, path: impl Into<String>) -> Self {
        self.home_path = path.into();
        self
    }

    /// Base URL of the API; also the origin product image paths resolve against.
    #[must_use]
    pub fn api_base_url(&self) -> &Url {
        &self.api_base_url
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Directory for persisted state, if any.
    #[must_use]
    pub fn state_dir(&self) -> Option<&Path> {
        self.state_dir.as_deref()
    }

    /// Login page path.
    #[must_use]
    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Home page path.
    #[must_use]
    pub fn home_path(&self) -> &str {
        &self.home_path
    }
}

fn local_path(var: &str, path: String) -> Result<String, Error> {
    if path.starts_with('/') && !path.starts_with("//") {
        Ok(path)
    } else {
        Err(Error::Config(format!("{var} must be a local path starting with '/'")))
    }
}
