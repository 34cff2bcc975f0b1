#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Declarative HTTP exchange clients
//!
//! A service is declared once as data (verb, path template, parameter
//! bindings, media types, optional API version) and turned into a live
//! [`ClientProxy`] by a [`ProxyFactory`]:
//! - methods are compiled into immutable [`RequestTemplate`]s at build time
//! - call arguments are bound by an ordered, extensible resolver chain
//! - request and response bodies go through pluggable [`Codec`]s
//! - every group gets its own onion of tower layers (auth, custom
//!   interceptors, logging, error classification) over one [`Transport`]
//! - the API version is resolved per call from call, method, group and
//!   global settings
//!
//! # Example
//!
//! ```ignore
//! use exchange_http::{Arg, ExchangeConfig, MethodSpec, ParamSpec, ProxyFactory, ServiceDefinition};
//!
//! let factory = ProxyFactory::builder()
//!     .config(ExchangeConfig::load("exchange.yaml".as_ref())?)
//!     .build()?;
//!
//! let objects = ServiceDefinition::new("objects").method(
//!     MethodSpec::get("get", "/objects/{id}")
//!         .param(ParamSpec::path("id"))
//!         .returns::<Object>(),
//! );
//! let client = factory.create_client(&objects, "catalog")?;
//! let object: Object = client.invoke("get", vec![Arg::value(123)]).await?.into_result()?;
//! ```

pub mod codec;
pub mod config;
mod error;
pub mod humantime_serde;
pub mod interceptor;
pub mod policy;
mod proxy;
mod request;
pub mod resolver;
mod secret;
pub mod template;
pub mod transport;

pub use codec::{Codec, CodecRegistry, Direction, Payload};
pub use config::{ConfigError, DefaultsConfig, ExchangeConfig, GroupConfig};
pub use error::{BODY_PREVIEW_LIMIT, BoxError, ExchangeError, HttpFailure, TemplateError};
pub use interceptor::{
    ExchangeRequest, ExchangeResponse, ExchangeService, Interceptor, InterceptorChain, Next,
};
pub use policy::{
    AuthBinding, CallOptions, GroupProfile, GroupRegistry, RequestPolicy, VersionInserter,
    VersionOverride,
};
pub use proxy::{
    AuthLayerFn, ClientProxy, GroupCustomization, Outcome, ProxyFactory, ProxyFactoryBuilder,
};
pub use request::RequestBuilder;
pub use resolver::{Arg, ArgumentResolver, ArgumentResolvers, TypedArgumentResolver};
pub use secret::SecretString;
pub use template::{
    MethodSpec, ParamBinding, ParamKind, ParamSpec, RequestTemplate, ServiceDefinition,
    TemplateCache, ValueType, compile,
};
pub use transport::{HyperTransport, TlsRoots, Transport, TransportConfig};
