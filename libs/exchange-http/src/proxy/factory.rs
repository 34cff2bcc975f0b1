use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::builder::ProxyFactoryBuilder;
use super::client::ClientProxy;
use crate::config::ConfigError;
use crate::error::{ExchangeError, TemplateError};
use crate::interceptor::ExchangeService;
use crate::policy::GroupRegistry;
use crate::resolver::ArgumentResolvers;
use crate::template::{ServiceDefinition, TemplateCache};

pub struct FactoryInner {
    pub(crate) groups: GroupRegistry,
    pub(crate) services: HashMap<String, ExchangeService>,
    pub(crate) resolvers: ArgumentResolvers,
    pub(crate) templates: TemplateCache,
}

/// Creates [`ClientProxy`] stubs for service declarations.
///
/// Built once at startup; cheap to clone and share.
#[derive(Clone)]
pub struct ProxyFactory {
    inner: Arc<FactoryInner>,
}

impl ProxyFactory {
    #[must_use]
    pub fn builder() -> ProxyFactoryBuilder {
        ProxyFactoryBuilder::new()
    }

    pub(crate) fn from_inner(inner: FactoryInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    #[must_use]
    pub fn groups(&self) -> &GroupRegistry {
        &self.inner.groups
    }

    #[must_use]
    pub fn template_cache(&self) -> &TemplateCache {
        &self.inner.templates
    }

    /// Compile every method of `service` and bind the stub to `group`.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnknownGroup`], a [`TemplateError`] for a bad
    /// declaration, or [`ExchangeError::UnresolvedArgument`] when a custom
    /// parameter type has no resolver.
    pub fn create_client(
        &self,
        service: &ServiceDefinition,
        group: &str,
    ) -> Result<ClientProxy, ExchangeError> {
        let profile = Arc::clone(self.inner.groups.get(group)?);
        let exchange = self
            .inner
            .services
            .get(group)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownGroup(group.to_owned()))?;

        let mut seen = HashSet::new();
        if let Some(dup) = service.methods().iter().find(|m| !seen.insert(m.name())) {
            return Err(TemplateError::DuplicateMethod {
                service: service.name().to_owned(),
                method: dup.name().to_owned(),
            }
            .into());
        }

        let mut methods = HashMap::with_capacity(service.methods().len());
        for spec in service.methods() {
            let template = self.inner.templates.get_or_compile(service, spec)?;
            self.inner.resolvers.check(&template)?;
            methods.insert(spec.name().to_owned(), template);
        }

        tracing::debug!(
            service = service.name(),
            group,
            methods = methods.len(),
            "client proxy created"
        );
        Ok(ClientProxy::new(
            service.name().to_owned(),
            methods,
            profile,
            exchange,
            self.inner.resolvers.clone(),
        ))
    }
}

impl fmt::Debug for ProxyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyFactory")
            .field("groups", &self.inner.groups)
            .field("templates", &self.inner.templates.len())
            .finish_non_exhaustive()
    }
}
