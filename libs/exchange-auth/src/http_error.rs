use exchange_http::ExchangeError;

/// Render an [`ExchangeError`] raised while talking to an identity provider,
/// prefixed with the calling context (e.g. `"OAuth2 token"`).
///
/// Response bodies are never included: provider diagnostics may echo
/// credentials back.
#[must_use]
pub fn format_exchange_error(e: &ExchangeError, prefix: &str) -> String {
    match e {
        ExchangeError::ClientError(failure) | ExchangeError::ServerError(failure) => {
            format!("{prefix} HTTP {}", failure.status)
        }
        ExchangeError::Timeout(duration) => {
            format!("{prefix} request timed out after {duration:?}")
        }
        ExchangeError::Transport(err) => format!("{prefix} transport error: {err}"),
        ExchangeError::InvalidUrl { url, reason } => {
            format!("{prefix} invalid URL '{url}': {reason}")
        }
        ExchangeError::InvalidHeaderName(err) => format!("{prefix} invalid header name: {err}"),
        ExchangeError::InvalidHeaderValue(err) => format!("{prefix} invalid header value: {err}"),
        ExchangeError::Encode(err) => format!("{prefix} form encode error: {err}"),
        ExchangeError::Cancelled => format!("{prefix} request cancelled"),
        _ => format!("{prefix} request failed"),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use bytes::Bytes;
    use exchange_http::HttpFailure;
    use std::time::Duration;

    #[test]
    fn test_http_status_excludes_body() {
        let err = ExchangeError::ClientError(Box::new(HttpFailure {
            status: http::StatusCode::UNAUTHORIZED,
            headers: http::HeaderMap::new(),
            body: Bytes::from_static(b"client_secret=leaked"),
            payload: None,
        }));
        let msg = format_exchange_error(&err, "OAuth2 token");
        assert_eq!(msg, "OAuth2 token HTTP 401 Unauthorized");
        assert!(!msg.contains("leaked"));
    }

    #[test]
    fn test_timeout_keeps_duration() {
        let err = ExchangeError::Timeout(Duration::from_secs(3));
        assert_eq!(
            format_exchange_error(&err, "OAuth2 token"),
            "OAuth2 token request timed out after 3s"
        );
    }

    #[test]
    fn test_unrelated_variants_omit_detail() {
        let err = ExchangeError::mapped(std::io::Error::other("secret detail"));
        assert_eq!(format_exchange_error(&err, "X"), "X request failed");
    }
}
