use super::{Arg, ArgumentResolver};
use crate::codec::Payload;
use crate::error::ExchangeError;
use crate::request::RequestBuilder;
use crate::template::{ParamBinding, ParamKind};

/// Substitutes `{name}` placeholders. A collection is joined with `,`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PathVariableResolver;

impl ArgumentResolver for PathVariableResolver {
    fn supports(&self, binding: &ParamBinding) -> bool {
        binding.kind() == ParamKind::Path
    }

    fn resolve(
        &self,
        arg: &Arg,
        binding: &ParamBinding,
        builder: &mut RequestBuilder,
    ) -> Result<bool, ExchangeError> {
        match arg {
            Arg::Value(v) => builder.set_path_var(binding.name(), v.as_str()),
            Arg::Values(vs) => builder.set_path_var(binding.name(), vs.join(",")),
            Arg::Null if !binding.is_required() => builder.set_path_var(binding.name(), ""),
            Arg::Null | Arg::Body(_) | Arg::Custom(_) => return Ok(false),
        }
        Ok(true)
    }
}

/// Repeatable query parameters; a collection expands to one pair per element.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryParamResolver;

impl ArgumentResolver for QueryParamResolver {
    fn supports(&self, binding: &ParamBinding) -> bool {
        binding.kind() == ParamKind::Query
    }

    fn resolve(
        &self,
        arg: &Arg,
        binding: &ParamBinding,
        builder: &mut RequestBuilder,
    ) -> Result<bool, ExchangeError> {
        match arg {
            Arg::Value(v) => builder.add_query(binding.name(), v.as_str()),
            Arg::Values(vs) => {
                for v in vs {
                    builder.add_query(binding.name(), v.as_str());
                }
            }
            Arg::Null => return Ok(!binding.is_required()),
            Arg::Body(_) | Arg::Custom(_) => return Ok(false),
        }
        Ok(true)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HeaderResolver;

impl ArgumentResolver for HeaderResolver {
    fn supports(&self, binding: &ParamBinding) -> bool {
        binding.kind() == ParamKind::Header
    }

    fn resolve(
        &self,
        arg: &Arg,
        binding: &ParamBinding,
        builder: &mut RequestBuilder,
    ) -> Result<bool, ExchangeError> {
        match arg {
            Arg::Value(v) => builder.add_header(binding.name(), v)?,
            Arg::Values(vs) => {
                for v in vs {
                    builder.add_header(binding.name(), v)?;
                }
            }
            Arg::Null => return Ok(!binding.is_required()),
            Arg::Body(_) | Arg::Custom(_) => return Ok(false),
        }
        Ok(true)
    }
}

/// The single request body. A plain string value is sent as a string body.
#[derive(Clone, Copy, Debug, Default)]
pub struct BodyResolver;

impl ArgumentResolver for BodyResolver {
    fn supports(&self, binding: &ParamBinding) -> bool {
        binding.kind() == ParamKind::Body
    }

    fn resolve(
        &self,
        arg: &Arg,
        binding: &ParamBinding,
        builder: &mut RequestBuilder,
    ) -> Result<bool, ExchangeError> {
        match arg {
            Arg::Body(payload) => builder.set_body(payload.clone()),
            Arg::Value(v) => builder.set_body(Payload::new(v)?),
            Arg::Null => return Ok(!binding.is_required()),
            Arg::Values(_) | Arg::Custom(_) => return Ok(false),
        }
        Ok(true)
    }
}
