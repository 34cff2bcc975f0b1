use std::fmt;
use std::time::Duration;

use exchange_http::SecretString;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::TokenError;

/// Freshness of a [`TokenRecord`] at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Valid,
    /// Still accepted upstream but inside the refresh margin.
    Expiring,
    Expired,
}

/// Cached credential for one registration.
#[derive(Clone)]
pub struct TokenRecord {
    registration: String,
    access_token: SecretString,
    refresh_token: Option<SecretString>,
    scope: Option<String>,
    issued_at: OffsetDateTime,
    refresh_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

impl TokenRecord {
    /// Record issued at `issued_at` and living for `ttl`.
    ///
    /// The token turns [`TokenState::Expiring`] `refresh_margin` before
    /// expiry, or at half its lifetime when the margin is not shorter than
    /// the lifetime.
    pub fn new(
        registration: impl Into<String>,
        access_token: SecretString,
        issued_at: OffsetDateTime,
        ttl: Duration,
        refresh_margin: Duration,
    ) -> Self {
        let lead = ttl
            .checked_sub(refresh_margin)
            .filter(|lead| !lead.is_zero())
            .unwrap_or(ttl / 2);
        Self {
            registration: registration.into(),
            access_token,
            refresh_token: None,
            scope: None,
            issued_at,
            refresh_at: saturating_after(issued_at, lead),
            expires_at: saturating_after(issued_at, ttl),
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: Option<SecretString>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn registration(&self) -> &str {
        &self.registration
    }

    #[must_use]
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    #[must_use]
    pub fn issued_at(&self) -> OffsetDateTime {
        self.issued_at
    }

    #[must_use]
    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    #[must_use]
    pub fn state(&self, now: OffsetDateTime) -> TokenState {
        if now >= self.expires_at {
            TokenState::Expired
        } else if now >= self.refresh_at {
            TokenState::Expiring
        } else {
            TokenState::Valid
        }
    }

    /// Same record, expired as of `now`. The refresh token is kept.
    #[must_use]
    pub fn expire(mut self, now: OffsetDateTime) -> Self {
        self.refresh_at = self.refresh_at.min(now);
        self.expires_at = self.expires_at.min(now);
        self
    }

    /// Build a record from a token endpoint response.
    ///
    /// A response without `refresh_token` keeps `previous_refresh`.
    ///
    /// # Errors
    /// Returns [`TokenError::UnsupportedTokenType`] for a non-Bearer token
    /// and [`TokenError::InvalidResponse`] for an empty access token or an
    /// expiry past the representable date range.
    pub fn from_response(
        registration: &str,
        response: TokenResponse,
        now: OffsetDateTime,
        default_ttl: Duration,
        refresh_margin: Duration,
        previous_refresh: Option<SecretString>,
    ) -> Result<Self, TokenError> {
        if let Some(tt) = &response.token_type
            && !tt.eq_ignore_ascii_case("bearer")
        {
            return Err(TokenError::UnsupportedTokenType(tt.clone()));
        }
        if response.access_token.is_empty() {
            return Err(TokenError::InvalidResponse("empty access_token".into()));
        }

        let ttl = response
            .expires_in
            .map_or(default_ttl, Duration::from_secs);
        if checked_after(now, ttl).is_none() {
            return Err(TokenError::InvalidResponse(format!(
                "expires_in of {}s is out of range",
                ttl.as_secs()
            )));
        }
        let refresh_token = response
            .refresh_token
            .filter(|rt| !rt.is_empty())
            .map(SecretString::new)
            .or(previous_refresh);

        Ok(Self::new(
            registration,
            SecretString::new(response.access_token),
            now,
            ttl,
            refresh_margin,
        )
        .with_refresh_token(refresh_token)
        .with_scope(response.scope))
    }
}

fn checked_after(at: OffsetDateTime, by: Duration) -> Option<OffsetDateTime> {
    time::Duration::try_from(by)
        .ok()
        .and_then(|by| at.checked_add(by))
}

/// `at + by`, clamped to the last representable instant.
#[must_use]
pub fn saturating_after(at: OffsetDateTime, by: Duration) -> OffsetDateTime {
    at.saturating_add(time::Duration::try_from(by).unwrap_or(time::Duration::MAX))
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("registration", &self.registration)
            .field("access_token", &self.access_token)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token endpoint response (RFC 6749 §5.1).
///
/// Deserialize-only so tokens cannot be serialized into logs by accident.
/// Unknown fields are ignored.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);
    const MARGIN: Duration = Duration::from_secs(30);

    fn response(json: &str) -> TokenResponse {
        serde_json::from_str(json).unwrap()
    }

    fn t0() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH
    }

    #[test]
    fn test_state_follows_margin() {
        let record = TokenRecord::new("reg", SecretString::new("tok"), t0(), HOUR, MARGIN);
        assert_eq!(record.state(t0()), TokenState::Valid);
        assert_eq!(record.state(t0() + (HOUR - MARGIN)), TokenState::Expiring);
        assert_eq!(record.state(t0() + HOUR), TokenState::Expired);
    }

    #[test]
    fn test_short_lived_token_refreshes_at_half_life() {
        let record = TokenRecord::new(
            "reg",
            SecretString::new("tok"),
            t0(),
            Duration::from_secs(20),
            MARGIN,
        );
        assert_eq!(record.state(t0() + Duration::from_secs(9)), TokenState::Valid);
        assert_eq!(record.state(t0() + Duration::from_secs(10)), TokenState::Expiring);
    }

    #[test]
    fn test_from_response_uses_default_ttl() {
        let record = TokenRecord::from_response(
            "reg",
            response(r#"{"access_token":"tok-456"}"#),
            t0(),
            Duration::from_secs(300),
            MARGIN,
            None,
        )
        .unwrap();
        assert_eq!(record.access_token().expose(), "tok-456");
        assert_eq!(record.expires_at(), t0() + Duration::from_secs(300));
        assert!(record.refresh_token().is_none());
    }

    #[test]
    fn test_from_response_keeps_previous_refresh_token() {
        let previous = Some(SecretString::new("rt-old"));
        let kept = TokenRecord::from_response(
            "reg",
            response(r#"{"access_token":"a","expires_in":60}"#),
            t0(),
            HOUR,
            MARGIN,
            previous.clone(),
        )
        .unwrap();
        assert_eq!(kept.refresh_token().unwrap().expose(), "rt-old");

        let rotated = TokenRecord::from_response(
            "reg",
            response(r#"{"access_token":"a","refresh_token":"rt-new","scope":"read"}"#),
            t0(),
            HOUR,
            MARGIN,
            previous,
        )
        .unwrap();
        assert_eq!(rotated.refresh_token().unwrap().expose(), "rt-new");
        assert_eq!(rotated.scope(), Some("read"));
    }

    #[test]
    fn test_from_response_rejects_non_bearer() {
        let err = TokenRecord::from_response(
            "reg",
            response(r#"{"access_token":"tok","token_type":"mac"}"#),
            t0(),
            HOUR,
            MARGIN,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TokenError::UnsupportedTokenType(ref t) if t == "mac"));

        let ok = TokenRecord::from_response(
            "reg",
            response(r#"{"access_token":"tok","token_type":"bearer"}"#),
            t0(),
            HOUR,
            MARGIN,
            None,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_from_response_rejects_unrepresentable_expiry() {
        let err = TokenRecord::from_response(
            "reg",
            response(r#"{"access_token":"a","expires_in":18446744073709551615}"#),
            t0(),
            HOUR,
            MARGIN,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TokenError::InvalidResponse(ref m) if m.contains("out of range")));
    }

    #[test]
    fn test_huge_lifetime_saturates() {
        let record = TokenRecord::new(
            "reg",
            SecretString::new("tok"),
            t0(),
            Duration::MAX,
            MARGIN,
        );
        assert_eq!(record.state(t0() + HOUR), TokenState::Valid);
    }

    #[test]
    fn test_debug_never_shows_tokens() {
        let record = TokenRecord::new("reg", SecretString::new("tok-secret"), t0(), HOUR, MARGIN)
            .with_refresh_token(Some(SecretString::new("rt-secret")));
        let dbg = format!("{record:?}");
        assert!(!dbg.contains("tok-secret"));
        assert!(!dbg.contains("rt-secret"));

        let resp = response(r#"{"access_token":"tok-secret","refresh_token":"rt-secret"}"#);
        let dbg = format!("{resp:?}");
        assert!(!dbg.contains("tok-secret"));
        assert!(!dbg.contains("rt-secret"));
    }
}
