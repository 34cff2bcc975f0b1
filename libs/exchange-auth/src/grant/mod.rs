//! Grant strategies: how a registration obtains a token when no usable
//! refresh token is cached.

mod endpoint;

pub use endpoint::TokenEndpoint;

use std::sync::Arc;

use async_trait::async_trait;
use exchange_http::SecretString;
use zeroize::Zeroizing;

use crate::error::TokenError;
use crate::registration::{AuthRegistration, GrantType};
use crate::store::CredentialStore;
use crate::token::TokenResponse;

/// Acquisition half of a grant. Refreshing is shared by every grant and
/// lives on [`TokenEndpoint::refresh`].
#[async_trait]
pub trait Grant: Send + Sync + 'static {
    fn grant_type(&self) -> GrantType;

    /// Obtain a brand-new token.
    ///
    /// # Errors
    /// Returns [`TokenError::CredentialUnavailable`] when the grant needs
    /// input that only a user can provide, or any endpoint error.
    async fn acquire(
        &self,
        endpoint: &TokenEndpoint,
        store: &dyn CredentialStore,
    ) -> Result<TokenResponse, TokenError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ClientCredentialsGrant;

#[async_trait]
impl Grant for ClientCredentialsGrant {
    fn grant_type(&self) -> GrantType {
        GrantType::ClientCredentials
    }

    async fn acquire(
        &self,
        endpoint: &TokenEndpoint,
        _store: &dyn CredentialStore,
    ) -> Result<TokenResponse, TokenError> {
        endpoint.request("client_credentials", &[]).await
    }
}

/// Bootstraps from a configured long-lived refresh token.
#[derive(Debug)]
pub struct RefreshTokenGrant {
    seed: Option<SecretString>,
}

impl RefreshTokenGrant {
    #[must_use]
    pub fn new(seed: Option<SecretString>) -> Self {
        Self { seed }
    }
}

#[async_trait]
impl Grant for RefreshTokenGrant {
    fn grant_type(&self) -> GrantType {
        GrantType::RefreshToken
    }

    async fn acquire(
        &self,
        endpoint: &TokenEndpoint,
        _store: &dyn CredentialStore,
    ) -> Result<TokenResponse, TokenError> {
        match &self.seed {
            Some(seed) => endpoint.refresh(seed).await,
            None => Err(TokenError::CredentialUnavailable {
                registration: endpoint.registration().to_owned(),
                reason: "no refresh token configured".into(),
            }),
        }
    }
}

/// Exchanges a code deposited in the [`CredentialStore`] by the application.
/// Never waits for one to appear.
///
/// The code stays in the store across transient failures so a retry can
/// reuse it, and is consumed by any other outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct AuthorizationCodeGrant;

#[async_trait]
impl Grant for AuthorizationCodeGrant {
    fn grant_type(&self) -> GrantType {
        GrantType::AuthorizationCode
    }

    async fn acquire(
        &self,
        endpoint: &TokenEndpoint,
        store: &dyn CredentialStore,
    ) -> Result<TokenResponse, TokenError> {
        let Some(grant) = store.peek_grant(endpoint.registration()).await? else {
            return Err(TokenError::CredentialUnavailable {
                registration: endpoint.registration().to_owned(),
                reason: "no authorization grant; complete the user redirect first".into(),
            });
        };

        let code = Zeroizing::new(grant.code.expose().to_owned());
        let verifier = grant
            .code_verifier
            .as_ref()
            .map(|v| Zeroizing::new(v.expose().to_owned()));
        let mut fields = vec![
            ("code", code.as_str()),
            ("redirect_uri", grant.redirect_uri.as_str()),
        ];
        if let Some(verifier) = &verifier {
            fields.push(("code_verifier", verifier.as_str()));
        }
        let result = endpoint.request("authorization_code", &fields).await;

        // The code is single-use: keep it only for a retry of a transient failure.
        if !matches!(&result, Err(err) if err.is_transient()) {
            store.take_grant(endpoint.registration()).await?;
        }
        result
    }
}

/// Strategy for a configured registration.
#[must_use]
pub fn for_registration(registration: &AuthRegistration) -> Arc<dyn Grant> {
    match registration.grant_type {
        GrantType::ClientCredentials => Arc::new(ClientCredentialsGrant),
        GrantType::RefreshToken => Arc::new(RefreshTokenGrant::new(registration.refresh_token.clone())),
        GrantType::AuthorizationCode => Arc::new(AuthorizationCodeGrant),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::store::{AuthorizationGrant, InMemoryCredentialStore};
    use exchange_http::{HyperTransport, TransportConfig};
    use httpmock::prelude::*;
    use url::Url;

    fn endpoint(registration: &AuthRegistration) -> TokenEndpoint {
        let transport = HyperTransport::new(&TransportConfig::for_testing()).unwrap();
        TokenEndpoint::new("portal", registration, Arc::new(transport)).unwrap()
    }

    fn registration(server: &MockServer, grant_type: GrantType) -> AuthRegistration {
        AuthRegistration::client_credentials(
            Url::parse(&format!("http://localhost:{}/token", server.port())).unwrap(),
            "portal-client",
            "portal-secret",
        )
        .with_grant_type(grant_type)
    }

    #[tokio::test]
    async fn test_authorization_code_without_grant_is_unavailable() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200).body(r#"{"access_token":"never"}"#);
        });

        let reg = registration(&server, GrantType::AuthorizationCode);
        let store = InMemoryCredentialStore::new();
        let err = AuthorizationCodeGrant
            .acquire(&endpoint(&reg), &store)
            .await
            .unwrap_err();

        assert!(matches!(err, TokenError::CredentialUnavailable { ref registration, .. } if registration == "portal"));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_authorization_code_exchanges_deposited_grant() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("grant_type=authorization_code")
                .body_includes("code=abc")
                .body_includes("redirect_uri=https%3A%2F%2Fapp.example.com%2Fcb")
                .body_includes("code_verifier=pkce-v");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"user-tok","refresh_token":"user-rt"}"#);
        });

        let reg = registration(&server, GrantType::AuthorizationCode);
        let store = InMemoryCredentialStore::new();
        store
            .put_grant(
                "portal",
                AuthorizationGrant::new("abc", "https://app.example.com/cb")
                    .with_code_verifier("pkce-v"),
            )
            .await
            .unwrap();

        let resp = AuthorizationCodeGrant
            .acquire(&endpoint(&reg), &store)
            .await
            .unwrap();
        assert_eq!(resp.access_token, "user-tok");
        mock.assert();

        // the code was consumed
        assert!(store.take_grant("portal").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_authorization_code_kept_after_server_error() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/token").body_includes("code=abc");
            then.status(503);
        });

        let reg = registration(&server, GrantType::AuthorizationCode);
        let store = InMemoryCredentialStore::new();
        store
            .put_grant("portal", AuthorizationGrant::new("abc", "https://app.example.com/cb"))
            .await
            .unwrap();

        let err = AuthorizationCodeGrant
            .acquire(&endpoint(&reg), &store)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        mock.assert();
        assert!(store.peek_grant("portal").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_authorization_code_consumed_by_invalid_grant() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(400)
                .header("content-type", "application/json")
                .body(r#"{"error":"invalid_grant"}"#);
        });

        let reg = registration(&server, GrantType::AuthorizationCode);
        let store = InMemoryCredentialStore::new();
        store
            .put_grant("portal", AuthorizationGrant::new("abc", "https://app.example.com/cb"))
            .await
            .unwrap();

        let err = AuthorizationCodeGrant
            .acquire(&endpoint(&reg), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Status { ref error, .. } if error.as_deref() == Some("invalid_grant")));
        assert!(store.peek_grant("portal").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_token_grant_uses_seed() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("grant_type=refresh_token")
                .body_includes("refresh_token=seed-rt");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"from-seed"}"#);
        });

        let reg = registration(&server, GrantType::RefreshToken).with_refresh_token("seed-rt");
        let grant = for_registration(&reg);
        assert_eq!(grant.grant_type(), GrantType::RefreshToken);

        let resp = grant
            .acquire(&endpoint(&reg), &InMemoryCredentialStore::new())
            .await
            .unwrap();
        assert_eq!(resp.access_token, "from-seed");
        mock.assert();
    }
}
