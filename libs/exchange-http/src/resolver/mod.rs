//! Binding call arguments into a [`RequestBuilder`].

mod builtin;
mod typed;

pub use builtin::{BodyResolver, HeaderResolver, PathVariableResolver, QueryParamResolver};
pub use typed::TypedArgumentResolver;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::codec::Payload;
use crate::error::ExchangeError;
use crate::request::RequestBuilder;
use crate::template::{ParamBinding, ParamKind, RequestTemplate};

/// A call-site argument value.
#[derive(Clone)]
pub enum Arg {
    Null,
    Value(String),
    Values(Vec<String>),
    Body(Payload),
    Custom(Arc<dyn Any + Send + Sync>),
}

impl Arg {
    pub fn value(value: impl ToString) -> Self {
        Self::Value(value.to_string())
    }

    pub fn values<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        Self::Values(values.into_iter().map(|v| v.to_string()).collect())
    }

    /// `Null` for `None`, otherwise a single value.
    pub fn optional<V: ToString>(value: Option<V>) -> Self {
        value.map_or(Self::Null, |v| Self::Value(v.to_string()))
    }

    /// Serialize `value` as a request body.
    ///
    /// # Errors
    /// Returns [`ExchangeError::Encode`] when `value` cannot be serialized.
    pub fn body<T: Serialize + 'static>(value: &T) -> Result<Self, ExchangeError> {
        Payload::new(value).map(Self::Body)
    }

    /// Structured argument for a type-dispatched resolver.
    pub fn custom<T: Any + Send + Sync>(value: T) -> Self {
        Self::Custom(Arc::new(value))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Values(v) => f.debug_tuple("Values").field(v).finish(),
            Self::Body(p) => f.debug_tuple("Body").field(&p.value_type().name()).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Value(value.to_owned())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Self::Value(value)
    }
}

/// Plug-in that binds one argument into the request under construction.
pub trait ArgumentResolver: Send + Sync + 'static {
    /// Whether this resolver can ever handle `binding`. Checked at proxy
    /// build time for custom-typed parameters.
    fn supports(&self, binding: &ParamBinding) -> bool;

    /// Bind `arg`; `Ok(false)` passes the parameter to the next resolver.
    ///
    /// # Errors
    /// Returns an error when the value is unusable (e.g. an invalid header).
    fn resolve(
        &self,
        arg: &Arg,
        binding: &ParamBinding,
        builder: &mut RequestBuilder,
    ) -> Result<bool, ExchangeError>;
}

/// Ordered resolver chain; the first resolver that handles a parameter wins.
#[derive(Clone)]
pub struct ArgumentResolvers {
    resolvers: Vec<Arc<dyn ArgumentResolver>>,
}

impl ArgumentResolvers {
    /// `custom` resolvers, in order, ahead of the built-ins.
    #[must_use]
    pub fn new(custom: Vec<Arc<dyn ArgumentResolver>>) -> Self {
        let mut resolvers = custom;
        resolvers.extend(Self::builtin());
        Self { resolvers }
    }

    fn builtin() -> [Arc<dyn ArgumentResolver>; 4] {
        [
            Arc::new(PathVariableResolver),
            Arc::new(QueryParamResolver),
            Arc::new(HeaderResolver),
            Arc::new(BodyResolver),
        ]
    }

    /// Append after every existing resolver.
    pub fn push(&mut self, resolver: Arc<dyn ArgumentResolver>) {
        self.resolvers.push(resolver);
    }

    /// Insert ahead of every existing resolver.
    pub fn prepend(&mut self, resolver: Arc<dyn ArgumentResolver>) {
        self.resolvers.insert(0, resolver);
    }

    #[must_use]
    pub fn supports(&self, binding: &ParamBinding) -> bool {
        self.resolvers.iter().any(|r| r.supports(binding))
    }

    /// Check that every custom-typed parameter of `template` has a resolver.
    ///
    /// # Errors
    /// Returns [`ExchangeError::UnresolvedArgument`] for the first parameter
    /// no resolver supports.
    pub fn check(&self, template: &RequestTemplate) -> Result<(), ExchangeError> {
        match template
            .bindings()
            .iter()
            .find(|b| b.kind() == ParamKind::Custom && !self.supports(b))
        {
            Some(binding) => Err(ExchangeError::UnresolvedArgument {
                method: template.name().to_owned(),
                param: binding.name().to_owned(),
            }),
            None => Ok(()),
        }
    }

    /// Bind every argument of one call.
    ///
    /// # Errors
    /// Returns [`ExchangeError::ArgumentCount`] on arity mismatch and
    /// [`ExchangeError::UnresolvedArgument`] when no resolver handled a
    /// parameter.
    pub fn resolve_all(
        &self,
        template: &RequestTemplate,
        args: &[Arg],
        builder: &mut RequestBuilder,
    ) -> Result<(), ExchangeError> {
        let bindings = template.bindings();
        if args.len() != bindings.len() {
            return Err(ExchangeError::ArgumentCount {
                method: template.name().to_owned(),
                expected: bindings.len(),
                actual: args.len(),
            });
        }

        for binding in bindings {
            let arg = &args[binding.index()];
            let mut handled = false;
            for resolver in &self.resolvers {
                if resolver.supports(binding) && resolver.resolve(arg, binding, builder)? {
                    handled = true;
                    break;
                }
            }
            if !handled {
                return Err(ExchangeError::UnresolvedArgument {
                    method: template.name().to_owned(),
                    param: binding.name().to_owned(),
                });
            }
        }
        Ok(())
    }
}

impl Default for ArgumentResolvers {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
