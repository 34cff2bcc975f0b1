use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tower::{Layer, Service};

use super::factory::{FactoryInner, ProxyFactory};
use crate::codec::{Codec, CodecRegistry};
use crate::config::{ConfigError, ExchangeConfig};
use crate::error::ExchangeError;
use crate::interceptor::{
    ErrorClassificationLayer, ExchangeRequest, ExchangeResponse, ExchangeService, Interceptor,
    InterceptorChain, InterceptorLayer, LoggingInterceptor,
};
use crate::policy::{AuthBinding, GroupProfile, GroupRegistry};
use crate::resolver::{ArgumentResolver, ArgumentResolvers};
use crate::template::TemplateCache;
use crate::transport::{HyperTransport, Transport, TransportService};

/// Wraps a group's chain with authentication.
///
/// Called once per group bound to an `OAuth2` registration, with the group
/// name, the registration id and the chain below the auth link.
pub type AuthLayerFn =
    Arc<dyn Fn(&str, &str, ExchangeService) -> Result<ExchangeService, ExchangeError> + Send + Sync>;

/// Programmatic additions to one group.
#[derive(Clone, Default)]
pub struct GroupCustomization {
    interceptors: InterceptorChain,
    codecs: Vec<Arc<dyn Codec>>,
}

impl GroupCustomization {
    /// Append an interceptor; earlier ones run further out.
    pub fn interceptor(&mut self, interceptor: impl Interceptor) -> &mut Self {
        self.interceptors.push_interceptor(interceptor);
        self
    }

    /// Append a raw tower layer.
    pub fn layer<L>(&mut self, layer: L) -> &mut Self
    where
        L: Layer<ExchangeService> + Send + Sync + 'static,
        L::Service: Service<ExchangeRequest, Response = ExchangeResponse, Error = ExchangeError>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<ExchangeRequest>>::Future: Send + 'static,
    {
        self.interceptors.push_layer(layer);
        self
    }

    /// Codec consulted before factory-level overrides and the built-ins.
    pub fn codec(&mut self, codec: impl Codec) -> &mut Self {
        self.codecs.push(Arc::new(codec));
        self
    }
}

impl fmt::Debug for GroupCustomization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupCustomization")
            .field("interceptors", &self.interceptors)
            .field("codecs", &self.codecs.iter().map(|c| c.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`ProxyFactory`].
#[derive(Default)]
pub struct ProxyFactoryBuilder {
    config: ExchangeConfig,
    transport: Option<Arc<dyn Transport>>,
    resolvers: Vec<Arc<dyn ArgumentResolver>>,
    codecs: Vec<Arc<dyn Codec>>,
    groups: BTreeMap<String, GroupCustomization>,
    auth_layer: Option<AuthLayerFn>,
}

impl ProxyFactoryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: ExchangeConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default [`HyperTransport`].
    #[must_use]
    pub fn transport(self, transport: impl Transport) -> Self {
        self.transport_arc(Arc::new(transport))
    }

    #[must_use]
    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Resolver placed ahead of the built-ins, after earlier registrations.
    #[must_use]
    pub fn argument_resolver(mut self, resolver: impl ArgumentResolver) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }

    /// Codec placed ahead of the built-ins in every group.
    #[must_use]
    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codecs.push(Arc::new(codec));
        self
    }

    /// Add interceptors or codecs to one group. The group must exist in the
    /// configuration when [`build`](Self::build) runs.
    #[must_use]
    pub fn configure_group(
        mut self,
        group: impl Into<String>,
        configure: impl FnOnce(&mut GroupCustomization),
    ) -> Self {
        configure(self.groups.entry(group.into()).or_default());
        self
    }

    /// Install the hook that wraps groups bound to an `OAuth2` registration.
    #[must_use]
    pub fn with_auth_layer<F>(mut self, layer: F) -> Self
    where
        F: Fn(&str, &str, ExchangeService) -> Result<ExchangeService, ExchangeError>
            + Send
            + Sync
            + 'static,
    {
        self.auth_layer = Some(Arc::new(layer));
        self
    }

    #[must_use]
    pub fn configuration(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Resolve every group and assemble its chain.
    ///
    /// # Errors
    /// Returns [`ExchangeError::Config`] for invalid configuration, a
    /// customization naming an unknown group, or an `OAuth2`-bound group with
    /// no auth layer installed.
    pub fn build(self) -> Result<ProxyFactory, ExchangeError> {
        self.config.validate()?;
        let configured = self.config.effective_groups();
        if let Some(unknown) = self.groups.keys().find(|name| !configured.contains_key(*name)) {
            return Err(ConfigError::UnknownGroup(unknown.clone()).into());
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new(&self.config.transport)?),
        };

        let mut groups = GroupRegistry::new();
        let mut services = HashMap::with_capacity(configured.len());
        for (name, group_config) in &configured {
            let custom = self.groups.get(name);
            let interceptors = custom.map(|c| c.interceptors.clone()).unwrap_or_default();
            let group_codecs = custom.map_or(&[][..], |c| c.codecs.as_slice());
            let codecs = CodecRegistry::with_defaults()
                .with_overrides(&self.codecs)
                .with_overrides(group_codecs);

            let profile = GroupProfile::resolve(name, &self.config.defaults, group_config)?
                .with_extensions(interceptors, codecs);
            let service = assemble(&profile, Arc::clone(&transport), self.auth_layer.as_ref())?;

            tracing::info!(
                group = %name,
                base_url = %profile.base_url(),
                interceptors = profile.interceptors().len(),
                codecs = profile.codecs().len(),
                "exchange group ready"
            );
            services.insert(name.clone(), service);
            groups.insert(profile);
        }

        Ok(ProxyFactory::from_inner(FactoryInner {
            groups,
            services,
            resolvers: ArgumentResolvers::new(self.resolvers),
            templates: TemplateCache::new(),
        }))
    }
}

impl fmt::Debug for ProxyFactoryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyFactoryBuilder")
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .field("resolvers", &self.resolvers.len())
            .field("codecs", &self.codecs.len())
            .field("groups", &self.groups)
            .field("auth_layer", &self.auth_layer.is_some())
            .finish()
    }
}

/// Outer to inner: auth, group interceptors, logging, error classification,
/// transport.
fn assemble(
    profile: &GroupProfile,
    transport: Arc<dyn Transport>,
    auth_layer: Option<&AuthLayerFn>,
) -> Result<ExchangeService, ExchangeError> {
    let mut service =
        ExchangeService::new(ErrorClassificationLayer::new().layer(TransportService::new(transport)));
    if profile.logging() {
        service = ExchangeService::new(InterceptorLayer::new(LoggingInterceptor).layer(service));
    }
    service = profile.interceptors().wrap(service);

    if let AuthBinding::Registration(registration) = profile.auth() {
        let hook = auth_layer.ok_or_else(|| ConfigError::MissingAuthLayer {
            group: profile.name().to_owned(),
            registration: registration.clone(),
        })?;
        service = hook(profile.name(), registration, service)?;
    }
    Ok(service)
}
