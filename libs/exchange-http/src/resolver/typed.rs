use std::any::Any;
use std::marker::PhantomData;

use super::{Arg, ArgumentResolver};
use crate::error::ExchangeError;
use crate::request::RequestBuilder;
use crate::template::ParamBinding;

/// Resolver dispatched on the declared parameter type `T`.
///
/// Handles [`Arg::Custom`] values holding a `T` by calling `f`; a null
/// argument to an optional parameter is skipped.
pub struct TypedArgumentResolver<T, F> {
    f: F,
    _marker: PhantomData<fn(&T)>,
}

impl<T, F> TypedArgumentResolver<T, F>
where
    T: Any + Send + Sync,
    F: Fn(&T, &ParamBinding, &mut RequestBuilder) -> Result<(), ExchangeError>
        + Send
        + Sync
        + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<T, F> ArgumentResolver for TypedArgumentResolver<T, F>
where
    T: Any + Send + Sync,
    F: Fn(&T, &ParamBinding, &mut RequestBuilder) -> Result<(), ExchangeError>
        + Send
        + Sync
        + 'static,
{
    fn supports(&self, binding: &ParamBinding) -> bool {
        binding.value_type().is::<T>()
    }

    fn resolve(
        &self,
        arg: &Arg,
        binding: &ParamBinding,
        builder: &mut RequestBuilder,
    ) -> Result<bool, ExchangeError> {
        match arg {
            Arg::Custom(value) => match value.downcast_ref::<T>() {
                Some(typed) => {
                    (self.f)(typed, binding, builder)?;
                    Ok(true)
                }
                None => Ok(false),
            },
            Arg::Null => Ok(!binding.is_required()),
            Arg::Value(_) | Arg::Values(_) | Arg::Body(_) => Ok(false),
        }
    }
}
