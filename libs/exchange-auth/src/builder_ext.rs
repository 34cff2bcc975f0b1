use exchange_http::{ConfigError, ExchangeError, ExchangeService, ProxyFactoryBuilder};
use tower::Layer;

use crate::layer::BearerAuthLayer;
use crate::manager::TokenManager;

/// Wires a [`TokenManager`] into a [`ProxyFactoryBuilder`].
pub trait ProxyFactoryBuilderExt {
    /// Wrap every group bound to an `OAuth2` registration with a
    /// [`BearerAuthLayer`].
    ///
    /// Factory build fails with [`ConfigError::InvalidGroup`] when a group
    /// names a registration the manager does not know, including every
    /// registration when the manager is disabled.
    #[must_use]
    fn with_token_manager(self, manager: TokenManager) -> Self;
}

impl ProxyFactoryBuilderExt for ProxyFactoryBuilder {
    fn with_token_manager(self, manager: TokenManager) -> Self {
        self.with_auth_layer(move |group, registration, service| {
            if !manager.contains(registration) {
                let reason = if manager.is_enabled() {
                    format!("unknown OAuth2 registration `{registration}`")
                } else {
                    format!("OAuth2 registration `{registration}` set but OAuth2 is disabled")
                };
                return Err(ExchangeError::Config(ConfigError::InvalidGroup {
                    group: group.to_owned(),
                    reason,
                }));
            }
            tracing::debug!(group, registration, "bearer auth attached");
            Ok(ExchangeService::new(
                BearerAuthLayer::new(manager.clone(), registration).layer(service),
            ))
        })
    }
}
