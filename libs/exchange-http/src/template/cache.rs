use std::sync::Arc;

use dashmap::DashMap;

use super::{MethodSpec, RequestTemplate, ServiceDefinition, compile};
use crate::error::TemplateError;

/// Compiled templates keyed by `(service, method)`.
///
/// Every proxy built from one factory shares a single template per method.
#[derive(Debug, Default)]
pub struct TemplateCache {
    templates: DashMap<(String, String), Arc<RequestTemplate>>,
}

impl TemplateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached template, compiling and caching it on first use.
    ///
    /// The declaration is always compiled and must match the cached
    /// template, so a different service reusing a name cannot pick up
    /// another service's template.
    ///
    /// # Errors
    /// Propagates compilation errors, and returns
    /// [`TemplateError::ConflictingDefinition`] when `(service, method)` is
    /// already cached with a different shape. Nothing is cached on failure.
    pub fn get_or_compile(
        &self,
        service: &ServiceDefinition,
        spec: &MethodSpec,
    ) -> Result<Arc<RequestTemplate>, TemplateError> {
        let compiled = Arc::new(compile(service, spec)?);
        let key = (service.name().to_owned(), spec.name().to_owned());
        let cached = Arc::clone(
            self.templates
                .entry(key)
                .or_insert_with(|| Arc::clone(&compiled))
                .value(),
        );
        if cached != compiled {
            return Err(TemplateError::ConflictingDefinition {
                service: service.name().to_owned(),
                method: spec.name().to_owned(),
            });
        }
        Ok(cached)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
