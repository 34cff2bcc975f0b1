use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use super::{ExchangeRequest, ExchangeResponse};
use crate::error::{ExchangeError, HttpFailure};

/// Tower layer that turns non-2xx responses into classified errors.
///
/// 4xx becomes [`ExchangeError::ClientError`], 5xx becomes
/// [`ExchangeError::ServerError`]. A JSON body is attached as the failure
/// payload; any other body is kept raw only. Sits directly above the
/// transport, so every interceptor observes classified outcomes.
///
/// Only 4xx and 5xx are failures. The transport never follows redirects,
/// and a 1xx or 3xx response passes through unclassified to be decoded like
/// a 2xx. A group that needs redirects treated as errors adds an
/// interceptor that remaps them.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorClassificationLayer;

impl ErrorClassificationLayer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for ErrorClassificationLayer {
    type Service = ErrorClassificationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ErrorClassificationService { inner }
    }
}

#[derive(Clone, Debug)]
pub struct ErrorClassificationService<S> {
    inner: S,
}

impl<S> Service<ExchangeRequest> for ErrorClassificationService<S>
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

    fn call(&mut self, request: ExchangeRequest) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let response = inner.call(request).await?;
            classify(response)
        })
    }
}

fn classify(response: ExchangeResponse) -> Result<ExchangeResponse, ExchangeError> {
    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return Ok(response);
    }

    let (parts, body) = response.into_parts();
    let payload = serde_json::from_slice::<serde_json::Value>(&body).ok();
    let failure = Box::new(HttpFailure {
        status,
        headers: parts.headers,
        body,
        payload,
    });

    tracing::debug!(status = status.as_u16(), "classified error response");

    if status.is_client_error() {
        Err(ExchangeError::ClientError(failure))
    } else {
        Err(ExchangeError::ServerError(failure))
    }
}
