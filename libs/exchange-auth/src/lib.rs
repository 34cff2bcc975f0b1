#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! `OAuth2` token lifecycle for exchange clients
//!
//! - [`TokenManager`] caches one token per registration, refreshes it ahead
//!   of expiry and collapses concurrent fetches into a single upstream call
//! - client-credentials, refresh-token and authorization-code grants
//! - [`BearerAuthLayer`] attaches the token to outgoing requests and drops
//!   it when the upstream answers 401
//! - [`ProxyFactoryBuilderExt::with_token_manager`] plugs all of this into
//!   an `exchange_http` factory
//!
//! # Example
//!
//! ```ignore
//! use exchange_auth::{AuthConfig, ProxyFactoryBuilderExt, TokenManager};
//! use exchange_http::{ExchangeConfig, ProxyFactory};
//!
//! let path = "exchange.yaml".as_ref();
//! let manager = TokenManager::builder(AuthConfig::load(path)?).build()?;
//! let factory = ProxyFactory::builder()
//!     .config(ExchangeConfig::load(path)?)
//!     .with_token_manager(manager)
//!     .build()?;
//! ```

pub mod backoff;
mod builder_ext;
pub mod clock;
mod error;
pub mod grant;
mod http_error;
mod layer;
mod manager;
pub mod registration;
pub mod store;
mod token;

#[cfg(test)]
mod testing;

pub use backoff::BackoffConfig;
pub use builder_ext::ProxyFactoryBuilderExt;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::TokenError;
pub use grant::{Grant, TokenEndpoint};
pub use http_error::format_exchange_error;
pub use layer::{BearerAuthLayer, BearerAuthService};
pub use manager::{TokenManager, TokenManagerBuilder};
pub use registration::{
    AuthConfig, AuthRegistration, ClientAuthMethod, GrantType, RefreshFailurePolicy,
    TokenSettings,
};
pub use store::{AuthorizationGrant, CredentialStore, InMemoryCredentialStore};
pub use token::{TokenRecord, TokenResponse, TokenState};
