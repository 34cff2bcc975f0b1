use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use exchange_http::SecretString;
use figment::Figment;
use serde::Deserialize;
use url::Url;

use crate::backoff::BackoffConfig;
use crate::error::TokenError;

/// Figment key holding the [`AuthConfig`] section.
pub const CONFIG_KEY: &str = "oauth2";

/// How a registration obtains its first token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    ClientCredentials,
    /// Seeded with a long-lived refresh token from configuration.
    RefreshToken,
    /// Needs a code obtained out of band by a user redirect.
    AuthorizationCode,
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
            Self::AuthorizationCode => "authorization_code",
        })
    }
}

/// `OAuth2` client authentication method.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `Authorization: Basic base64(client_id:client_secret)` (RFC 6749 §2.3.1).
    #[default]
    Basic,
    /// `client_id` and `client_secret` as form fields.
    Form,
}

/// One credential source.
///
/// `Debug` redacts the client secret and extra header values.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthRegistration {
    pub grant_type: GrantType,
    pub token_endpoint: Url,
    pub client_id: String,
    #[serde(default = "empty_secret")]
    pub client_secret: SecretString,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub auth_method: ClientAuthMethod,
    /// Extra headers on every token request (vendor quirks).
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
    /// Initial refresh token for [`GrantType::RefreshToken`].
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new())
}

impl AuthRegistration {
    /// Client-credentials registration with Basic client authentication.
    pub fn client_credentials(
        token_endpoint: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            grant_type: GrantType::ClientCredentials,
            token_endpoint,
            client_id: client_id.into(),
            client_secret: SecretString::new(client_secret),
            scopes: Vec::new(),
            auth_method: ClientAuthMethod::Basic,
            extra_headers: BTreeMap::new(),
            refresh_token: None,
        }
    }

    #[must_use]
    pub fn with_grant_type(mut self, grant_type: GrantType) -> Self {
        self.grant_type = grant_type;
        self
    }

    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_auth_method(mut self, auth_method: ClientAuthMethod) -> Self {
        self.auth_method = auth_method;
        self
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::new(refresh_token));
        self
    }

    /// # Errors
    /// Returns [`TokenError::Config`] describing the first problem.
    pub fn validate(&self) -> Result<(), TokenError> {
        if self.client_id.trim().is_empty() {
            return Err(TokenError::Config("client_id must not be empty".into()));
        }
        if !matches!(self.token_endpoint.scheme(), "http" | "https") {
            return Err(TokenError::Config(format!(
                "token_endpoint must be http(s), got `{}`",
                self.token_endpoint.scheme()
            )));
        }
        match self.grant_type {
            GrantType::ClientCredentials if self.client_secret.is_empty() => Err(
                TokenError::Config("client_secret must not be empty".into()),
            ),
            GrantType::RefreshToken if self.refresh_token.as_ref().is_none_or(SecretString::is_empty) => {
                Err(TokenError::Config(
                    "refresh_token grant needs a refresh_token".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for AuthRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted_headers: Vec<_> = self
            .extra_headers
            .keys()
            .map(|k| (k.as_str(), "[REDACTED]"))
            .collect();
        f.debug_struct("AuthRegistration")
            .field("grant_type", &self.grant_type)
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("scopes", &self.scopes)
            .field("auth_method", &self.auth_method)
            .field("extra_headers", &redacted_headers)
            .field("refresh_token", &self.refresh_token)
            .finish()
    }
}

/// What to do with the cached token when a refresh fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshFailurePolicy {
    /// Serve the previous token until it really expires, retrying the
    /// refresh no sooner than `refresh_retry_interval`.
    #[default]
    KeepUntilExpiry,
    /// Drop the previous token immediately.
    Invalidate,
}

/// Token lifecycle tuning shared by all registrations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenSettings {
    /// Refresh this long before expiry.
    #[serde(with = "exchange_http::humantime_serde")]
    pub refresh_margin: Duration,
    /// Lifetime assumed when the endpoint omits `expires_in`.
    #[serde(with = "exchange_http::humantime_serde")]
    pub default_ttl: Duration,
    /// Bound on one acquisition attempt.
    #[serde(with = "exchange_http::humantime_serde")]
    pub acquire_timeout: Duration,
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
    pub refresh_failure: RefreshFailurePolicy,
    #[serde(with = "exchange_http::humantime_serde")]
    pub refresh_retry_interval: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            refresh_margin: Duration::from_secs(30),
            default_ttl: Duration::from_secs(5 * 60),
            acquire_timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff: BackoffConfig::default(),
            refresh_failure: RefreshFailurePolicy::default(),
            refresh_retry_interval: Duration::from_secs(10),
        }
    }
}

impl TokenSettings {
    /// Short timings and a single attempt.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(2),
            max_attempts: 1,
            backoff: BackoffConfig::fast(),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), TokenError> {
        if self.max_attempts == 0 {
            return Err(TokenError::Config("max_attempts must be at least 1".into()));
        }
        if self.acquire_timeout.is_zero() {
            return Err(TokenError::Config("acquire_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// The `oauth2` configuration section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub registrations: BTreeMap<String, AuthRegistration>,
    pub tokens: TokenSettings,
}

impl AuthConfig {
    /// Extract the [`CONFIG_KEY`] section; a missing section is an empty
    /// config.
    ///
    /// # Errors
    /// Returns [`TokenError::Config`] for malformed or invalid content.
    pub fn from_figment(figment: &Figment) -> Result<Self, TokenError> {
        if !figment.contains(CONFIG_KEY) {
            return Ok(Self::default());
        }
        let config: Self = figment
            .extract_inner(CONFIG_KEY)
            .map_err(|e| TokenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the same YAML file and environment as the exchange config.
    ///
    /// # Errors
    /// Returns [`TokenError::Config`] when the file is missing or invalid.
    pub fn load(path: &Path) -> Result<Self, TokenError> {
        if !path.is_file() {
            return Err(TokenError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        Self::from_figment(&exchange_http::ExchangeConfig::figment(Some(path)))
    }

    #[must_use]
    pub fn with_registration(mut self, id: impl Into<String>, registration: AuthRegistration) -> Self {
        self.registrations.insert(id.into(), registration);
        self
    }

    #[must_use]
    pub fn with_tokens(mut self, tokens: TokenSettings) -> Self {
        self.tokens = tokens;
        self
    }

    /// # Errors
    /// Returns [`TokenError::Config`] naming the offending registration.
    pub fn validate(&self) -> Result<(), TokenError> {
        self.tokens.validate()?;
        for (id, registration) in &self.registrations {
            registration
                .validate()
                .map_err(|e| TokenError::Config(format!("registration `{id}`: {e}")))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
