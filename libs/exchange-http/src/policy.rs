//! Group profiles and per-call policy resolution.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use http::header::{AUTHORIZATION, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::codec::CodecRegistry;
use crate::config::{ConfigError, DefaultsConfig, GroupConfig, parse_base_url};
use crate::error::ExchangeError;
use crate::interceptor::InterceptorChain;
use crate::request::RequestBuilder;
use crate::secret::SecretString;
use crate::template::RequestTemplate;

/// Header carrying the API version unless a group says otherwise.
pub const DEFAULT_VERSION_HEADER: &str = "X-API-Version";

/// Where the resolved API version goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionInserter {
    Header(String),
    QueryParam(String),
}

impl Default for VersionInserter {
    fn default() -> Self {
        Self::Header(DEFAULT_VERSION_HEADER.to_owned())
    }
}

impl VersionInserter {
    /// Write `version`, replacing any value already bound under the same name.
    ///
    /// # Errors
    /// Returns an error when the configured header name is invalid.
    pub fn insert(&self, version: &str, builder: &mut RequestBuilder) -> Result<(), ExchangeError> {
        match self {
            Self::Header(name) => builder.insert_header(name, version),
            Self::QueryParam(name) => {
                builder.set_query(name.as_str(), version);
                Ok(())
            }
        }
    }
}

/// How a group authenticates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthBinding {
    #[default]
    None,
    /// Bearer token from the named `OAuth2` registration.
    #[serde(rename = "oauth2")]
    Registration(String),
    /// Static `Authorization: Basic` header.
    Basic {
        username: String,
        password: SecretString,
    },
}

/// Per-call version override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionOverride {
    pub value: String,
    /// Beat a version pinned on the method itself.
    pub force: bool,
}

/// Settings for exactly one invocation. Never mutates shared state.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub version: Option<VersionOverride>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl CallOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Version used unless the method pins its own.
    #[must_use]
    pub fn version(mut self, value: impl Into<String>) -> Self {
        self.version = Some(VersionOverride {
            value: value.into(),
            force: false,
        });
        self
    }

    /// Version used even when the method pins its own.
    #[must_use]
    pub fn force_version(mut self, value: impl Into<String>) -> Self {
        self.version = Some(VersionOverride {
            value: value.into(),
            force: true,
        });
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Everything one invocation needs from the layered configuration.
#[derive(Debug, Clone)]
pub struct RequestPolicy {
    pub base_url: Url,
    pub headers: HeaderMap,
    pub timeout: Duration,
    pub version: Option<String>,
    pub version_inserter: VersionInserter,
}

/// Resolved, immutable configuration of one group.
#[derive(Clone)]
pub struct GroupProfile {
    name: String,
    base_url: Url,
    headers: HeaderMap,
    timeout: Duration,
    version: Option<String>,
    version_inserter: VersionInserter,
    logging: bool,
    auth: AuthBinding,
    interceptors: InterceptorChain,
    codecs: CodecRegistry,
}

impl GroupProfile {
    /// Layer `group` over `defaults`.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidGroup`] for a missing or malformed base
    /// URL or an unusable header.
    pub fn resolve(
        name: &str,
        defaults: &DefaultsConfig,
        group: &GroupConfig,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidGroup {
            group: name.to_owned(),
            reason,
        };

        let raw_url = group
            .base_url
            .as_ref()
            .or(defaults.base_url.as_ref())
            .ok_or_else(|| invalid("no base_url".to_owned()))?;
        let base_url = parse_base_url(raw_url).map_err(invalid)?;

        let mut headers = HeaderMap::new();
        for (k, v) in defaults.headers.iter().chain(&group.headers) {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|_| invalid(format!("invalid header name `{k}`")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|_| invalid(format!("invalid value for header `{k}`")))?;
            headers.insert(name, value);
        }
        let user_agent = group.user_agent.as_deref().unwrap_or(&defaults.user_agent);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).map_err(|_| invalid("invalid user_agent".to_owned()))?,
        );
        if let AuthBinding::Basic { username, password } = &group.auth {
            headers.insert(AUTHORIZATION, basic_auth(username, password).map_err(invalid)?);
        }

        Ok(Self {
            name: name.to_owned(),
            base_url,
            headers,
            timeout: group.timeout.unwrap_or(defaults.timeout),
            version: group.version.clone().or_else(|| defaults.version.clone()),
            version_inserter: group
                .version_inserter
                .clone()
                .unwrap_or_else(|| defaults.version_inserter.clone()),
            logging: group.logging.unwrap_or(defaults.logging),
            auth: group.auth.clone(),
            interceptors: InterceptorChain::new(),
            codecs: CodecRegistry::with_defaults(),
        })
    }

    pub(crate) fn with_extensions(mut self, interceptors: InterceptorChain, codecs: CodecRegistry) -> Self {
        self.interceptors = interceptors;
        self.codecs = codecs;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[must_use]
    pub fn version_inserter(&self) -> &VersionInserter {
        &self.version_inserter
    }

    #[must_use]
    pub fn logging(&self) -> bool {
        self.logging
    }

    #[must_use]
    pub fn auth(&self) -> &AuthBinding {
        &self.auth
    }

    #[must_use]
    pub fn interceptors(&self) -> &InterceptorChain {
        &self.interceptors
    }

    #[must_use]
    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Policy for one invocation of `template`.
    ///
    /// Headers: defaults < group < method-declared < per-call. Version: a
    /// forced per-call override, else the method's pinned version, else a
    /// plain per-call override, else the group (or global) default.
    ///
    /// # Errors
    /// Returns an error for an invalid per-call header.
    pub fn effective_policy(
        &self,
        template: &RequestTemplate,
        call: &CallOptions,
    ) -> Result<RequestPolicy, ExchangeError> {
        let mut headers = self.headers.clone();
        for (name, value) in template.headers() {
            headers.insert(name.clone(), value.clone());
        }
        for (name, value) in &call.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }

        Ok(RequestPolicy {
            base_url: self.base_url.clone(),
            headers,
            timeout: call.timeout.unwrap_or(self.timeout),
            version: resolve_version(self.version(), template.version(), call.version.as_ref()),
            version_inserter: self.version_inserter.clone(),
        })
    }
}

impl fmt::Debug for GroupProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupProfile")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("version", &self.version)
            .field("version_inserter", &self.version_inserter)
            .field("logging", &self.logging)
            .field("auth", &self.auth)
            .field("interceptors", &self.interceptors)
            .field("codecs", &self.codecs)
            .finish_non_exhaustive()
    }
}

fn resolve_version(
    group: Option<&str>,
    method: Option<&str>,
    call: Option<&VersionOverride>,
) -> Option<String> {
    match (call, method) {
        (Some(o), _) if o.force => Some(o.value.clone()),
        (_, Some(pinned)) => Some(pinned.to_owned()),
        (Some(o), None) => Some(o.value.clone()),
        (None, None) => group.map(str::to_owned),
    }
}

fn basic_auth(username: &str, password: &SecretString) -> Result<HeaderValue, String> {
    let encoded = base64::engine::general_purpose::STANDARD
        .encode(format!("{username}:{}", password.expose()));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .map_err(|_| "invalid basic credentials".to_owned())?;
    value.set_sensitive(true);
    Ok(value)
}

/// Resolved profiles by group name.
#[derive(Debug, Clone, Default)]
pub struct GroupRegistry {
    groups: HashMap<String, Arc<GroupProfile>>,
}

impl GroupRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, profile: GroupProfile) {
        self.groups.insert(profile.name.clone(), Arc::new(profile));
    }

    /// # Errors
    /// Returns [`ConfigError::UnknownGroup`] when `name` is not registered.
    pub fn get(&self, name: &str) -> Result<&Arc<GroupProfile>, ConfigError> {
        self.groups
            .get(name)
            .ok_or_else(|| ConfigError::UnknownGroup(name.to_owned()))
    }

    /// # Errors
    /// Returns an error for an unknown group or an invalid per-call header.
    pub fn effective_policy(
        &self,
        group: &str,
        template: &RequestTemplate,
        call: &CallOptions,
    ) -> Result<RequestPolicy, ExchangeError> {
        self.get(group)?.effective_policy(template, call)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
