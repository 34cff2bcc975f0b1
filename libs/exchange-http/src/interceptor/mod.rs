//! Onion-composed request/response interceptors.
//!
//! Every link is a tower layer over [`ExchangeService`]. The [`Interceptor`]
//! trait is the plug-in surface for extenders; raw tower layers are accepted
//! too.

mod classify;
mod logging;

pub use classify::{ErrorClassificationLayer, ErrorClassificationService};
pub use logging::LoggingInterceptor;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt};

use crate::error::ExchangeError;

/// Fully buffered outbound request. Cloning is cheap, so bodies stay
/// replayable for every link.
pub type ExchangeRequest = http::Request<Bytes>;

/// Fully buffered inbound response.
pub type ExchangeResponse = http::Response<Bytes>;

/// Type-erased service every chain link wraps.
pub type ExchangeService = BoxCloneSyncService<ExchangeRequest, ExchangeResponse, ExchangeError>;

type ExchangeFuture = Pin<Box<dyn Future<Output = Result<ExchangeResponse, ExchangeError>> + Send>>;

type LinkFn = Arc<dyn Fn(ExchangeService) -> ExchangeService + Send + Sync>;

/// The rest of the chain, handed to an [`Interceptor`].
///
/// `run` consumes `self`, so the rest of the chain runs at most once.
pub struct Next {
    inner: ExchangeService,
}

impl Next {
    /// Forward `request` to the remaining links.
    ///
    /// # Errors
    /// Propagates whatever the inner links return.
    pub async fn run(self, request: ExchangeRequest) -> Result<ExchangeResponse, ExchangeError> {
        self.inner.oneshot(request).await
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

/// Request/response transformer in the onion model.
///
/// An implementation may mutate the request, call `next` (or short-circuit
/// without it), then inspect or remap the outcome.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    async fn intercept(
        &self,
        request: ExchangeRequest,
        next: Next,
    ) -> Result<ExchangeResponse, ExchangeError>;
}

/// Adapts an [`Interceptor`] into a tower layer.
#[derive(Clone)]
pub struct InterceptorLayer {
    interceptor: Arc<dyn Interceptor>,
}

impl InterceptorLayer {
    pub fn new(interceptor: impl Interceptor) -> Self {
        Self {
            interceptor: Arc::new(interceptor),
        }
    }

    #[must_use]
    pub fn from_arc(interceptor: Arc<dyn Interceptor>) -> Self {
        Self { interceptor }
    }
}

impl Layer<ExchangeService> for InterceptorLayer {
    type Service = InterceptorService;

    fn layer(&self, inner: ExchangeService) -> Self::Service {
        InterceptorService {
            inner,
            interceptor: Arc::clone(&self.interceptor),
        }
    }
}

#[derive(Clone)]
pub struct InterceptorService {
    inner: ExchangeService,
    interceptor: Arc<dyn Interceptor>,
}

impl Service<ExchangeRequest> for InterceptorService {
    type Response = ExchangeResponse;
    type Error = ExchangeError;
    type Future = ExchangeFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: ExchangeRequest) -> Self::Future {
        // Clone-swap pattern (Tower Service contract).
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let interceptor = Arc::clone(&self.interceptor);

        Box::pin(async move { interceptor.intercept(request, Next { inner }).await })
    }
}

#[derive(Clone)]
enum Link {
    Interceptor(Arc<dyn Interceptor>),
    Layer(LinkFn),
}

impl Link {
    fn wrap(&self, inner: ExchangeService) -> ExchangeService {
        match self {
            Self::Interceptor(i) => {
                ExchangeService::new(InterceptorLayer::from_arc(Arc::clone(i)).layer(inner))
            }
            Self::Layer(f) => f(inner),
        }
    }
}

/// Ordered links, outermost first.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    links: Vec<Link>,
}

impl InterceptorChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_interceptor(&mut self, interceptor: impl Interceptor) {
        self.links.push(Link::Interceptor(Arc::new(interceptor)));
    }

    pub fn push_layer<L>(&mut self, layer: L)
    where
        L: Layer<ExchangeService> + Send + Sync + 'static,
        L::Service: Service<ExchangeRequest, Response = ExchangeResponse, Error = ExchangeError>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<ExchangeRequest>>::Future: Send + 'static,
    {
        self.links.push(Link::Layer(Arc::new(move |inner| {
            ExchangeService::new(layer.layer(inner))
        })));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Wrap `inner` so the first pushed link runs first on the way out.
    #[must_use]
    pub fn wrap(&self, inner: ExchangeService) -> ExchangeService {
        self.links.iter().rev().fold(inner, |svc, link| link.wrap(svc))
    }
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("links", &self.links.len())
            .finish()
    }
}
