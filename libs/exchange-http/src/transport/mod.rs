//! The single network send at the bottom of every chain.

mod client;
mod tls;

pub use client::HyperTransport;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tower::Service;

use crate::error::ExchangeError;
use crate::interceptor::{ExchangeRequest, ExchangeResponse};

/// Sends one buffered request and returns the buffered response.
///
/// Every HTTP status is a successful send; only connection-level failures
/// are errors. Implementations must be safe to call again with a clone of
/// the same request.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: ExchangeRequest) -> Result<ExchangeResponse, ExchangeError>;
}

/// Tower adapter so a [`Transport`] can terminate an interceptor chain.
#[derive(Clone)]
pub struct TransportService {
    transport: Arc<dyn Transport>,
}

impl TransportService {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl fmt::Debug for TransportService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportService").finish_non_exhaustive()
    }
}

impl Service<ExchangeRequest> for TransportService {
    type Response = ExchangeResponse;
    type Error = ExchangeError;
    type Future = Pin<Box<dyn Future<Output = Result<ExchangeResponse, ExchangeError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: ExchangeRequest) -> Self::Future {
        let transport = Arc::clone(&self.transport);
        Box::pin(async move { transport.send(request).await })
    }
}

/// Root certificates used for TLS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsRoots {
    /// Mozilla roots bundled at build time.
    #[default]
    WebPki,
    /// The operating system store.
    Native,
}

/// Settings of the built-in [`HyperTransport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub tls_roots: TlsRoots,
    /// Permit plain `http://` targets. Meant for local mock servers.
    pub allow_insecure_http: bool,
    /// Responses larger than this fail with a transport error.
    pub max_body_size: usize,
    #[serde(with = "crate::humantime_serde::option")]
    pub pool_idle_timeout: Option<Duration>,
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls_roots: TlsRoots::default(),
            allow_insecure_http: false,
            max_body_size: 10 * 1024 * 1024,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl TransportConfig {
    /// Defaults with plain HTTP allowed.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            allow_insecure_http: true,
            ..Self::default()
        }
    }
}
