use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use exchange_http::{HyperTransport, SecretString, Transport, TransportConfig};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::clock::{Clock, SystemClock};
use crate::error::TokenError;
use crate::grant::{self, Grant, TokenEndpoint};
use crate::registration::{AuthConfig, RefreshFailurePolicy, TokenSettings};
use crate::store::{AuthorizationGrant, CredentialStore, InMemoryCredentialStore};
use crate::token::{TokenRecord, TokenResponse, TokenState, saturating_after};

type Flight = Shared<BoxFuture<'static, Result<TokenRecord, TokenError>>>;

/// Coordination state of one registration.
#[derive(Default)]
struct Slot {
    generation: u64,
    /// The in-flight fetch or refresh, tagged with its generation.
    flight: Option<(u64, Flight)>,
    /// After a failed refresh that kept the previous token, no new attempt
    /// starts before this instant.
    retry_after: Option<OffsetDateTime>,
}

struct Registered {
    endpoint: TokenEndpoint,
    grant: Arc<dyn Grant>,
    slot: Mutex<Slot>,
}

struct ManagerInner {
    registrations: HashMap<String, Registered>,
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    settings: TokenSettings,
}

/// Acquires, caches and refreshes access tokens per registration.
///
/// Cheap to clone. Concurrent requests for the same registration share one
/// upstream call; requests for different registrations never wait on each
/// other. A manager built without registrations is disabled and rejects
/// every lookup.
#[derive(Clone)]
pub struct TokenManager {
    inner: Option<Arc<ManagerInner>>,
}

impl TokenManager {
    #[must_use]
    pub fn builder(config: AuthConfig) -> TokenManagerBuilder {
        TokenManagerBuilder::new(config)
    }

    /// Populated manager when `config` has registrations, disabled otherwise.
    ///
    /// # Errors
    /// Returns [`TokenError::Config`] for invalid configuration.
    pub fn from_config(
        config: AuthConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, TokenError> {
        Self::builder(config).transport_arc(transport).build()
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    #[must_use]
    pub fn contains(&self, registration: &str) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|i| i.registrations.contains_key(registration))
    }

    pub fn registrations(&self) -> impl Iterator<Item = &str> {
        self.inner
            .iter()
            .flat_map(|i| i.registrations.keys().map(String::as_str))
    }

    /// Current access token for `registration`, fetching or refreshing it
    /// first when needed.
    ///
    /// # Errors
    /// Returns [`TokenError::UnknownRegistration`], the grant's
    /// [`TokenError::CredentialUnavailable`], or the failure of the shared
    /// acquisition after bounded retries.
    pub async fn access_token(&self, registration: &str) -> Result<SecretString, TokenError> {
        self.token_record(registration)
            .await
            .map(|record| record.access_token().clone())
    }

    /// Like [`access_token`](Self::access_token) but returns the whole record.
    ///
    /// # Errors
    /// See [`access_token`](Self::access_token).
    pub async fn token_record(&self, registration: &str) -> Result<TokenRecord, TokenError> {
        let inner = self.enabled(registration)?;
        let entry = inner.entry(registration)?;

        if let Some(record) = inner.store.load(registration).await? {
            let now = inner.clock.now();
            let cooling_down = entry.slot.lock().retry_after.is_some_and(|t| now < t);
            let usable = match record.state(now) {
                TokenState::Valid => true,
                TokenState::Expiring => cooling_down,
                TokenState::Expired => false,
            };
            if usable {
                return Ok(record);
            }
        }

        inner.flight(registration)?.await
    }

    /// Drop the cached access token, e.g. after a downstream 401.
    ///
    /// A refresh token survives so the next request refreshes instead of
    /// starting the grant from scratch.
    ///
    /// # Errors
    /// Returns [`TokenError::UnknownRegistration`] or a store error.
    pub async fn invalidate(&self, registration: &str) -> Result<(), TokenError> {
        let inner = self.enabled(registration)?;
        let entry = inner.entry(registration)?;
        entry.slot.lock().retry_after = None;

        match inner.store.load(registration).await? {
            Some(record) if record.refresh_token().is_some() => {
                inner.store.save(record.expire(inner.clock.now())).await?;
            }
            Some(_) => inner.store.remove(registration).await?,
            None => {}
        }
        tracing::info!(registration, "token invalidated");
        Ok(())
    }

    /// Hand an authorization code to a registration using the
    /// authorization-code grant.
    ///
    /// # Errors
    /// Returns [`TokenError::UnknownRegistration`] or a store error.
    pub async fn put_grant(
        &self,
        registration: &str,
        grant: AuthorizationGrant,
    ) -> Result<(), TokenError> {
        let inner = self.enabled(registration)?;
        inner.entry(registration)?;
        inner.store.put_grant(registration, grant).await
    }

    fn enabled(&self, registration: &str) -> Result<&Arc<ManagerInner>, TokenError> {
        self.inner
            .as_ref()
            .ok_or_else(|| TokenError::UnknownRegistration(registration.to_owned()))
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registrations: Vec<&str> = self.registrations().collect();
        registrations.sort_unstable();
        f.debug_struct("TokenManager")
            .field("enabled", &self.is_enabled())
            .field("registrations", &registrations)
            .finish_non_exhaustive()
    }
}

impl ManagerInner {
    fn entry(&self, registration: &str) -> Result<&Registered, TokenError> {
        self.registrations
            .get(registration)
            .ok_or_else(|| TokenError::UnknownRegistration(registration.to_owned()))
    }

    /// Join the in-flight acquisition or start one.
    fn flight(self: &Arc<Self>, registration: &str) -> Result<Flight, TokenError> {
        let entry = self.entry(registration)?;
        let mut slot = entry.slot.lock();
        if let Some((_, flight)) = &slot.flight {
            return Ok(flight.clone());
        }

        slot.generation += 1;
        let generation = slot.generation;
        let this = Arc::clone(self);
        let id = registration.to_owned();
        let flight = async move {
            // A panic must not poison the shared flight left in the slot.
            let result = AssertUnwindSafe(this.acquire(&id))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    tracing::error!(registration = %id, "token acquisition panicked");
                    Err(TokenError::Aborted(panic_message(payload.as_ref())))
                });
            this.finish(&id, generation);
            result
        }
        .boxed()
        .shared();
        slot.flight = Some((generation, flight.clone()));
        Ok(flight)
    }

    fn finish(&self, registration: &str, generation: u64) {
        if let Ok(entry) = self.entry(registration) {
            let mut slot = entry.slot.lock();
            if slot.flight.as_ref().is_some_and(|(g, _)| *g == generation) {
                slot.flight = None;
            }
        }
    }

    async fn acquire(&self, registration: &str) -> Result<TokenRecord, TokenError> {
        let entry = self.entry(registration)?;
        let previous = self.store.load(registration).await?;
        if let Some(record) = &previous
            && record.state(self.clock.now()) == TokenState::Valid
        {
            return Ok(record.clone());
        }

        let refresh_token = previous.as_ref().and_then(|r| r.refresh_token().cloned());
        let refresh_with = refresh_token.as_ref();
        let store = self.store.as_ref();
        let response = self
            .with_retry(registration, move || async move {
                match refresh_with {
                    Some(rt) => entry.endpoint.refresh(rt).await,
                    None => entry.grant.acquire(&entry.endpoint, store).await,
                }
            })
            .await;

        let settings = &self.settings;
        let record = response.and_then(|response| {
            TokenRecord::from_response(
                registration,
                response,
                self.clock.now(),
                settings.default_ttl,
                settings.refresh_margin,
                refresh_token.clone(),
            )
        });

        match record {
            Ok(record) => {
                self.store.save(record.clone()).await?;
                entry.slot.lock().retry_after = None;
                tracing::info!(
                    registration,
                    refreshed = refresh_token.is_some(),
                    expires_at = %record.expires_at(),
                    "token acquired"
                );
                Ok(record)
            }
            Err(err) => {
                self.on_failure(registration, entry, previous.as_ref(), err)
                    .await
            }
        }
    }

    async fn with_retry<F, Fut>(
        &self,
        registration: &str,
        mut attempt_once: F,
    ) -> Result<TokenResponse, TokenError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<TokenResponse, TokenError>>,
    {
        let settings = &self.settings;
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(settings.acquire_timeout, attempt_once())
                .await
                .unwrap_or(Err(TokenError::Timeout(settings.acquire_timeout)));
            match result {
                Err(err) if err.is_transient() && attempt + 1 < settings.max_attempts => {
                    let delay = settings.backoff.delay(attempt);
                    tracing::debug!(
                        registration,
                        attempt = attempt + 1,
                        error = %err,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "token acquisition failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn on_failure(
        &self,
        registration: &str,
        entry: &Registered,
        previous: Option<&TokenRecord>,
        err: TokenError,
    ) -> Result<TokenRecord, TokenError> {
        let now = self.clock.now();
        let keep = self.settings.refresh_failure == RefreshFailurePolicy::KeepUntilExpiry
            && previous.is_some_and(|r| r.state(now) != TokenState::Expired);

        if keep {
            entry.slot.lock().retry_after =
                Some(saturating_after(now, self.settings.refresh_retry_interval));
            tracing::warn!(
                registration,
                error = %err,
                "token refresh failed; serving previous token until expiry"
            );
        } else {
            if previous.is_some() {
                self.store.remove(registration).await?;
            }
            tracing::warn!(registration, error = %err, "token acquisition failed");
        }
        Err(err)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_owned())
}

/// Builder for [`TokenManager`].
pub struct TokenManagerBuilder {
    config: AuthConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn CredentialStore>>,
    clock: Option<Arc<dyn Clock>>,
    grants: HashMap<String, Arc<dyn Grant>>,
}

impl TokenManagerBuilder {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            transport: None,
            store: None,
            clock: None,
            grants: HashMap::new(),
        }
    }

    /// Transport for token endpoint calls; defaults to an HTTPS-only
    /// [`HyperTransport`].
    #[must_use]
    pub fn transport(self, transport: impl Transport) -> Self {
        self.transport_arc(Arc::new(transport))
    }

    #[must_use]
    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to [`InMemoryCredentialStore`].
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Replace the grant strategy derived from a registration's `grant_type`.
    #[must_use]
    pub fn grant(mut self, registration: impl Into<String>, grant: impl Grant) -> Self {
        self.grants.insert(registration.into(), Arc::new(grant));
        self
    }

    /// # Errors
    /// Returns [`TokenError::Config`] for invalid configuration, a grant
    /// override naming an unknown registration, or a transport that cannot
    /// be built.
    pub fn build(mut self) -> Result<TokenManager, TokenError> {
        self.config.validate()?;
        if let Some(unknown) = self
            .grants
            .keys()
            .find(|id| !self.config.registrations.contains_key(*id))
        {
            return Err(TokenError::UnknownRegistration(unknown.clone()));
        }
        if self.config.is_empty() {
            tracing::info!("OAuth2 disabled: no registrations configured");
            return Ok(TokenManager::disabled());
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                HyperTransport::new(&TransportConfig::default())
                    .map_err(|e| TokenError::Config(e.to_string()))?,
            ),
        };

        let mut registrations = HashMap::with_capacity(self.config.registrations.len());
        for (id, registration) in &self.config.registrations {
            let endpoint = TokenEndpoint::new(id.clone(), registration, Arc::clone(&transport))?;
            let grant = self
                .grants
                .remove(id)
                .unwrap_or_else(|| grant::for_registration(registration));
            tracing::info!(
                registration = %id,
                grant_type = %grant.grant_type(),
                endpoint = %registration.token_endpoint,
                "OAuth2 registration ready"
            );
            registrations.insert(
                id.clone(),
                Registered {
                    endpoint,
                    grant,
                    slot: Mutex::default(),
                },
            );
        }

        Ok(TokenManager {
            inner: Some(Arc::new(ManagerInner {
                registrations,
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(InMemoryCredentialStore::new())),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                settings: self.config.tokens,
            })),
        })
    }
}

impl fmt::Debug for TokenManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManagerBuilder")
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .field("custom_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}
