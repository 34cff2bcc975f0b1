use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use exchange_http::SecretString;

use crate::error::TokenError;
use crate::token::TokenRecord;

/// Result of the user-facing half of an authorization-code flow, deposited
/// by the application once the redirect comes back.
#[derive(Clone)]
pub struct AuthorizationGrant {
    pub code: SecretString,
    pub redirect_uri: String,
    /// PKCE verifier, when the authorization request used a challenge.
    pub code_verifier: Option<SecretString>,
}

impl AuthorizationGrant {
    pub fn new(code: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            code: SecretString::new(code),
            redirect_uri: redirect_uri.into(),
            code_verifier: None,
        }
    }

    #[must_use]
    pub fn with_code_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(SecretString::new(verifier));
        self
    }
}

impl fmt::Debug for AuthorizationGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationGrant")
            .field("code", &self.code)
            .field("redirect_uri", &self.redirect_uri)
            .field("pkce", &self.code_verifier.is_some())
            .finish()
    }
}

/// Storage for token records and pending authorization grants, keyed by
/// registration id.
///
/// The token manager is the only writer of records; it keeps at most one
/// per registration.
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    async fn load(&self, registration: &str) -> Result<Option<TokenRecord>, TokenError>;

    /// Replace the record for `record.registration()`.
    async fn save(&self, record: TokenRecord) -> Result<(), TokenError>;

    async fn remove(&self, registration: &str) -> Result<(), TokenError>;

    /// Deposit an authorization grant for later exchange.
    async fn put_grant(
        &self,
        registration: &str,
        grant: AuthorizationGrant,
    ) -> Result<(), TokenError>;

    /// Pending grant, left in place.
    async fn peek_grant(&self, registration: &str)
    -> Result<Option<AuthorizationGrant>, TokenError>;

    /// Remove and return the pending grant; a code is single-use.
    async fn take_grant(&self, registration: &str)
    -> Result<Option<AuthorizationGrant>, TokenError>;
}

/// Process-local [`CredentialStore`].
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    records: DashMap<String, TokenRecord>,
    grants: DashMap<String, AuthorizationGrant>,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self, registration: &str) -> Result<Option<TokenRecord>, TokenError> {
        Ok(self.records.get(registration).map(|r| r.value().clone()))
    }

    async fn save(&self, record: TokenRecord) -> Result<(), TokenError> {
        self.records.insert(record.registration().to_owned(), record);
        Ok(())
    }

    async fn remove(&self, registration: &str) -> Result<(), TokenError> {
        self.records.remove(registration);
        Ok(())
    }

    async fn put_grant(
        &self,
        registration: &str,
        grant: AuthorizationGrant,
    ) -> Result<(), TokenError> {
        self.grants.insert(registration.to_owned(), grant);
        Ok(())
    }

    async fn peek_grant(
        &self,
        registration: &str,
    ) -> Result<Option<AuthorizationGrant>, TokenError> {
        Ok(self.grants.get(registration).map(|g| g.value().clone()))
    }

    async fn take_grant(
        &self,
        registration: &str,
    ) -> Result<Option<AuthorizationGrant>, TokenError> {
        Ok(self.grants.remove(registration).map(|(_, g)| g))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::time::Duration;
    use time::OffsetDateTime;

    fn record(registration: &str, token: &str) -> TokenRecord {
        TokenRecord::new(
            registration,
            SecretString::new(token),
            OffsetDateTime::UNIX_EPOCH,
            Duration::from_secs(60),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_one_record_per_registration() {
        let store = InMemoryCredentialStore::new();
        store.save(record("a", "first")).await.unwrap();
        store.save(record("a", "second")).await.unwrap();
        store.save(record("b", "other")).await.unwrap();

        assert_eq!(store.len(), 2);
        let loaded = store.load("a").await.unwrap().unwrap();
        assert_eq!(loaded.access_token().expose(), "second");

        store.remove("a").await.unwrap();
        assert!(store.load("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_grants_are_single_use() {
        let store = InMemoryCredentialStore::new();
        store
            .put_grant("portal", AuthorizationGrant::new("code-1", "https://app/cb"))
            .await
            .unwrap();
        assert!(store.peek_grant("portal").await.unwrap().is_some());
        let grant = store.take_grant("portal").await.unwrap().unwrap();
        assert_eq!(grant.code.expose(), "code-1");
        assert!(store.take_grant("portal").await.unwrap().is_none());
    }

    #[test]
    fn test_grant_debug_redacts_code() {
        let grant = AuthorizationGrant::new("code-secret", "https://app/cb").with_code_verifier("v");
        let dbg = format!("{grant:?}");
        assert!(!dbg.contains("code-secret"));
        assert!(dbg.contains("pkce: true"));
    }
}
