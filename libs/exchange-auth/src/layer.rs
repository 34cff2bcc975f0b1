use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use exchange_http::{ExchangeError, ExchangeRequest, ExchangeResponse, SecretString};
use http::header::AUTHORIZATION;
use http::{HeaderName, HeaderValue, StatusCode};
use tower::{Layer, Service};
use zeroize::Zeroizing;

use crate::manager::TokenManager;

/// Tower layer that attaches a bearer token from a [`TokenManager`].
///
/// A 401 from the wrapped chain invalidates the cached token so the next
/// call obtains a fresh one. The failing call itself is not replayed.
#[derive(Clone, Debug)]
pub struct BearerAuthLayer {
    manager: TokenManager,
    registration: Arc<str>,
    header: HeaderName,
}

impl BearerAuthLayer {
    #[must_use]
    pub fn new(manager: TokenManager, registration: impl Into<Arc<str>>) -> Self {
        Self {
            manager,
            registration: registration.into(),
            header: AUTHORIZATION,
        }
    }

    /// Send the token in `header` instead of `Authorization`.
    #[must_use]
    pub fn with_header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            manager: self.manager.clone(),
            registration: Arc::clone(&self.registration),
            header: self.header.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BearerAuthService<S> {
    inner: S,
    manager: TokenManager,
    registration: Arc<str>,
    header: HeaderName,
}

impl<S> Service<ExchangeRequest> for BearerAuthService<S>
where
    S: Service<ExchangeRequest, Response = ExchangeResponse, Error = ExchangeError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = ExchangeResponse;
    type Error = ExchangeError;
    type Future = Pin<Box<dyn Future<Output = Result<ExchangeResponse, ExchangeError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: ExchangeRequest) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let manager = self.manager.clone();
        let registration = Arc::clone(&self.registration);
        let header = self.header.clone();

        Box::pin(async move {
            let token = manager.access_token(&registration).await?;
            request.headers_mut().insert(header, bearer_value(&token)?);

            let result = inner.call(request).await;
            if is_unauthorized(&result) {
                tracing::debug!(
                    registration = %registration,
                    "upstream answered 401, invalidating token"
                );
                if let Err(err) = manager.invalidate(&registration).await {
                    tracing::warn!(registration = %registration, error = %err, "token invalidation failed");
                }
            }
            result
        })
    }
}

fn bearer_value(token: &SecretString) -> Result<HeaderValue, ExchangeError> {
    let raw = Zeroizing::new(format!("Bearer {}", token.expose()));
    let mut value = HeaderValue::try_from(raw.as_str()).map_err(|_| {
        ExchangeError::TokenAcquisition("access token is not a valid header value".into())
    })?;
    value.set_sensitive(true);
    Ok(value)
}

fn is_unauthorized(result: &Result<ExchangeResponse, ExchangeError>) -> bool {
    match result {
        Ok(response) => response.status() == StatusCode::UNAUTHORIZED,
        Err(err) => err.status() == Some(StatusCode::UNAUTHORIZED),
    }
}
