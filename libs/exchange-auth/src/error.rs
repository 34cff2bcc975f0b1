use std::time::Duration;

use exchange_http::ExchangeError;
use http::StatusCode;
use thiserror::Error;

/// Errors returned by the token lifecycle.
///
/// `Clone` so that one failed acquisition can be handed to every caller
/// waiting on it. No variant ever carries a secret value.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// Transport failure while calling the token endpoint.
    ///
    /// Produced by [`format_exchange_error`](crate::http_error::format_exchange_error);
    /// never contains response bodies.
    #[error("{0}")]
    Http(String),

    /// The token endpoint answered with a non-2xx status.
    #[error("OAuth2 token HTTP {status}{}", oauth_error_suffix(.error.as_deref()))]
    Status {
        status: StatusCode,
        /// RFC 6749 `error` code from the response body, when present.
        error: Option<String>,
    },

    /// The token endpoint returned an unparseable or incomplete response.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// The token endpoint returned a `token_type` that is not `Bearer`.
    #[error("unsupported token type: {0}")]
    UnsupportedTokenType(String),

    /// A single acquisition attempt did not finish in time.
    #[error("token acquisition timed out after {0:?}")]
    Timeout(Duration),

    /// No usable grant exists and none can be obtained without the user.
    #[error("credential unavailable for registration `{registration}`: {reason}")]
    CredentialUnavailable { registration: String, reason: String },

    #[error("unknown OAuth2 registration `{0}`")]
    UnknownRegistration(String),

    #[error("OAuth2 config error: {0}")]
    Config(String),

    /// The acquisition panicked; the message is the panic payload.
    #[error("token acquisition aborted: {0}")]
    Aborted(String),

    /// Reading or writing the credential store failed.
    #[error("credential store: {0}")]
    Store(String),
}

fn oauth_error_suffix(error: Option<&str>) -> String {
    error.map(|e| format!(" ({e})")).unwrap_or_default()
}

impl TokenError {
    /// Worth retrying: transport failures, timeouts, 429 and 5xx.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }
}

impl From<TokenError> for ExchangeError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::CredentialUnavailable { .. } | TokenError::UnknownRegistration(_) => {
                Self::CredentialUnavailable(err.to_string())
            }
            TokenError::Timeout(_) => Self::Transport(Box::new(err)),
            _ => Self::TokenAcquisition(err.to_string()),
        }
    }
}
