use http::StatusCode;

use crate::error::{ExchangeError, HttpFailure};

/// Result of one exchange that reached the point of talking to a server.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    /// 4xx response.
    ClientError(HttpFailure),
    /// 5xx response.
    ServerError(HttpFailure),
    /// Connection failure or timeout.
    TransportError(ExchangeError),
}

impl<T> Outcome<T> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Status of an HTTP error outcome.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::ClientError(f) | Self::ServerError(f) => Some(f.status),
            _ => None,
        }
    }

    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Success(value) => Outcome::Success(f(value)),
            Self::ClientError(failure) => Outcome::ClientError(failure),
            Self::ServerError(failure) => Outcome::ServerError(failure),
            Self::TransportError(err) => Outcome::TransportError(err),
        }
    }

    /// Flatten every non-success outcome into its [`ExchangeError`].
    ///
    /// # Errors
    /// Returns the error carried by a non-success outcome.
    pub fn into_result(self) -> Result<T, ExchangeError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::ClientError(failure) => Err(ExchangeError::ClientError(Box::new(failure))),
            Self::ServerError(failure) => Err(ExchangeError::ServerError(Box::new(failure))),
            Self::TransportError(err) => Err(err),
        }
    }

    /// Split a chain error into an outcome or a hard error.
    pub(crate) fn from_error(err: ExchangeError) -> Result<Self, ExchangeError> {
        match err {
            ExchangeError::ClientError(failure) => Ok(Self::ClientError(*failure)),
            ExchangeError::ServerError(failure) => Ok(Self::ServerError(*failure)),
            err @ (ExchangeError::Transport(_) | ExchangeError::Timeout(_)) => {
                Ok(Self::TransportError(err))
            }
            other => Err(other),
        }
    }
}
