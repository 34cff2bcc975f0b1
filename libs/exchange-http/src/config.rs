//! Layered configuration: serialized defaults, then an optional YAML file,
//! then `EXCHANGE__`-prefixed environment variables.
//!
//! ```yaml
//! defaults:
//!   timeout: 30s
//!   version: "1.0"
//! groups:
//!   catalog:
//!     base_url: https://catalog.internal
//!     auth:
//!       oauth2: catalog-client
//!   httpbin:
//!     base_url: https://httpbin.org
//!     version_inserter:
//!       query_param: api-version
//!     auth:
//!       basic: { username: user, password: passwd }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::policy::{AuthBinding, VersionInserter};
use crate::transport::TransportConfig;

/// Prefix of environment overrides; `__` separates nesting levels, e.g.
/// `EXCHANGE__GROUPS__CATALOG__TIMEOUT=5s`.
pub const ENV_PREFIX: &str = "EXCHANGE__";

/// Group created from `defaults` alone when no group of that name is
/// configured and `defaults.base_url` is set.
pub const DEFAULT_GROUP: &str = "default";

pub const DEFAULT_USER_AGENT: &str = concat!("exchange-http/", env!("CARGO_PKG_VERSION"));

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),

    #[error("configuration file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("invalid defaults: {0}")]
    InvalidDefaults(String),

    #[error("group `{group}`: {reason}")]
    InvalidGroup { group: String, reason: String },

    #[error("unknown group `{0}`")]
    UnknownGroup(String),

    #[error("group `{group}` binds auth registration `{registration}` but no auth layer is installed")]
    MissingAuthLayer { group: String, registration: String },

    #[error("invalid transport configuration: {0}")]
    Transport(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// Global defaults every group inherits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultsConfig {
    pub base_url: Option<String>,
    #[serde(with = "crate::humantime_serde")]
    pub timeout: Duration,
    pub user_agent: String,
    pub version: Option<String>,
    pub version_inserter: VersionInserter,
    pub headers: BTreeMap<String, String>,
    /// Install the logging interceptor.
    pub logging: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            version: None,
            version_inserter: VersionInserter::default(),
            headers: BTreeMap::new(),
            logging: true,
        }
    }
}

/// Per-group settings; absent fields fall back to [`DefaultsConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupConfig {
    pub base_url: Option<String>,
    #[serde(with = "crate::humantime_serde::option")]
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
    pub version: Option<String>,
    pub version_inserter: Option<VersionInserter>,
    pub headers: BTreeMap<String, String>,
    pub logging: Option<bool>,
    pub auth: AuthBinding,
}

/// Root of the `exchange` configuration tree.
///
/// Unknown top-level keys are tolerated so other sections (such as `oauth2`)
/// can live in the same document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub defaults: DefaultsConfig,
    pub groups: BTreeMap<String, GroupConfig>,
    pub transport: TransportConfig,
}

impl ExchangeConfig {
    /// Layered figment: defaults < `path` (YAML, when given) < environment.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::default("defaults", DefaultsConfig::default()))
            .merge(Serialized::default("transport", TransportConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Extract and validate.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when extraction or validation fails.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file plus environment overrides.
    ///
    /// # Errors
    /// Returns [`ConfigError::FileNotFound`] for a missing file and other
    /// [`ConfigError`] variants for invalid content.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        Self::from_figment(&Self::figment(Some(path)))
    }

    /// Fail fast on anything that would only break at call time.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let defaults = &self.defaults;
        if let Some(url) = &defaults.base_url {
            parse_base_url(url).map_err(ConfigError::InvalidDefaults)?;
        }
        if defaults.timeout.is_zero() {
            return Err(ConfigError::InvalidDefaults("timeout must be non-zero".to_owned()));
        }
        check_headers(&defaults.headers).map_err(ConfigError::InvalidDefaults)?;
        HeaderValue::from_str(&defaults.user_agent)
            .map_err(|_| ConfigError::InvalidDefaults("invalid user_agent".to_owned()))?;

        for (name, group) in &self.groups {
            validate_group(defaults, group).map_err(|reason| ConfigError::InvalidGroup {
                group: name.clone(),
                reason,
            })?;
        }

        if self.transport.max_body_size == 0 {
            return Err(ConfigError::Transport("max_body_size must be non-zero".to_owned()));
        }
        Ok(())
    }

    /// Configured groups plus the implicit [`DEFAULT_GROUP`].
    #[must_use]
    pub fn effective_groups(&self) -> BTreeMap<String, GroupConfig> {
        let mut groups = self.groups.clone();
        if self.defaults.base_url.is_some() && !groups.contains_key(DEFAULT_GROUP) {
            groups.insert(DEFAULT_GROUP.to_owned(), GroupConfig::default());
        }
        groups
    }
}

fn validate_group(defaults: &DefaultsConfig, group: &GroupConfig) -> Result<(), String> {
    match group.base_url.as_ref().or(defaults.base_url.as_ref()) {
        Some(url) => {
            parse_base_url(url)?;
        }
        None => return Err("no base_url (set it on the group or in defaults)".to_owned()),
    }
    if group.timeout.is_some_and(|t| t.is_zero()) {
        return Err("timeout must be non-zero".to_owned());
    }
    if let Some(ua) = &group.user_agent {
        HeaderValue::from_str(ua).map_err(|_| "invalid user_agent".to_owned())?;
    }
    check_headers(&group.headers)?;
    if let AuthBinding::Registration(id) = &group.auth
        && id.trim().is_empty()
    {
        return Err("empty oauth2 registration id".to_owned());
    }
    Ok(())
}

pub(crate) fn parse_base_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid base_url `{raw}`: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("base_url `{raw}` must use http or https"));
    }
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(format!("base_url `{raw}` has no host"));
    }
    Ok(url)
}

fn check_headers(headers: &BTreeMap<String, String>) -> Result<(), String> {
    for (name, value) in headers {
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| format!("invalid header name `{name}`"))?;
        HeaderValue::from_str(value).map_err(|_| format!("invalid value for header `{name}`"))?;
    }
    Ok(())
}
