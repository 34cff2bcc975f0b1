//! Service declarations and their compilation into immutable request templates.

mod cache;
mod path;

pub use cache::TemplateCache;
pub use path::{PathSegment, PathTemplate, join_slash};

use std::any::TypeId;
use std::collections::HashSet;

use http::{HeaderName, HeaderValue, Method};
use mime::Mime;

use crate::error::TemplateError;

/// Runtime identity of a Rust type, used for type-based resolver and codec
/// dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ValueType {
    id: TypeId,
    name: &'static str,
}

impl ValueType {
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The "no response body" type.
    #[must_use]
    pub fn unit() -> Self {
        Self::of::<()>()
    }

    #[must_use]
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    #[must_use]
    pub fn is_unit(&self) -> bool {
        self.is::<()>()
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Where a parameter lands in the outbound request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Path,
    Query,
    Header,
    Body,
    /// Bound by a type-dispatched custom resolver.
    Custom,
}

/// Declaration of one method parameter.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    name: String,
    kind: ParamKind,
    value_type: ValueType,
    required: bool,
}

impl ParamSpec {
    fn new(name: impl Into<String>, kind: ParamKind, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            kind,
            value_type,
            required: true,
        }
    }

    /// Path variable bound to the `{name}` placeholder.
    pub fn path(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Path, ValueType::of::<String>())
    }

    /// Repeatable query parameter.
    pub fn query(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Query, ValueType::of::<String>())
    }

    pub fn header(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Header, ValueType::of::<String>())
    }

    /// Request body serialized by the codec registry.
    pub fn body<T: 'static>(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Body, ValueType::of::<T>())
    }

    /// Structured argument bound by a resolver registered for `T`.
    pub fn custom<T: 'static>(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Custom, ValueType::of::<T>())
    }

    /// Allow a null argument; it is then omitted from the request.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// One method of a service: verb, path pattern, parameters, media types and
/// an optional pinned protocol version.
#[derive(Clone, Debug)]
pub struct MethodSpec {
    name: String,
    method: Method,
    path: String,
    params: Vec<ParamSpec>,
    response: ValueType,
    version: Option<String>,
    content_type: Option<Mime>,
    accept: Vec<Mime>,
    headers: Vec<(String, String)>,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            path: path.into(),
            params: Vec::new(),
            response: ValueType::unit(),
            version: None,
            content_type: None,
            accept: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn get(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Method::GET, path)
    }

    pub fn post(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Method::POST, path)
    }

    pub fn put(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Method::PUT, path)
    }

    pub fn patch(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Method::PATCH, path)
    }

    pub fn delete(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Method::DELETE, path)
    }

    pub fn head(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Method::HEAD, path)
    }

    pub fn options(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, Method::OPTIONS, path)
    }

    #[must_use]
    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Declare the decoded response type.
    #[must_use]
    pub fn returns<T: 'static>(mut self) -> Self {
        self.response = ValueType::of::<T>();
        self
    }

    /// Declare that the response body is discarded.
    #[must_use]
    pub fn returns_nothing(mut self) -> Self {
        self.response = ValueType::unit();
        self
    }

    /// Pin a protocol version on this method.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn content_type(mut self, media_type: Mime) -> Self {
        self.content_type = Some(media_type);
        self
    }

    #[must_use]
    pub fn accept(mut self, media_type: Mime) -> Self {
        self.accept.push(media_type);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A named set of methods sharing an optional interface-level base path.
#[derive(Clone, Debug)]
pub struct ServiceDefinition {
    name: String,
    base_path: Option<String>,
    methods: Vec<MethodSpec>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_path: None,
            methods: Vec::new(),
        }
    }

    /// Prefix every method path with `base_path`.
    #[must_use]
    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    #[must_use]
    pub fn method(mut self, method: MethodSpec) -> Self {
        self.methods.push(method);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn methods(&self) -> &[MethodSpec] {
        &self.methods
    }
}

/// A parameter as bound in a compiled template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamBinding {
    index: usize,
    name: String,
    kind: ParamKind,
    value_type: ValueType,
    required: bool,
}

impl ParamBinding {
    /// Position of the argument in the call.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }
}

/// Compiled, immutable description of how a method call becomes a request.
///
/// Shared read-only by every invocation of the method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestTemplate {
    service: String,
    name: String,
    method: Method,
    path: PathTemplate,
    bindings: Vec<ParamBinding>,
    content_type: Option<Mime>,
    accept: Vec<Mime>,
    response: ValueType,
    version: Option<String>,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl RequestTemplate {
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &PathTemplate {
        &self.path
    }

    #[must_use]
    pub fn bindings(&self) -> &[ParamBinding] {
        &self.bindings
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    #[must_use]
    pub fn accept(&self) -> &[Mime] {
        &self.accept
    }

    #[must_use]
    pub fn response(&self) -> ValueType {
        self.response
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[must_use]
    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    #[must_use]
    pub fn body_binding(&self) -> Option<&ParamBinding> {
        self.bindings.iter().find(|b| b.kind == ParamKind::Body)
    }
}

fn has_conventional_body(method: &Method) -> bool {
    !matches!(
        *method,
        Method::GET | Method::HEAD | Method::DELETE | Method::OPTIONS | Method::TRACE
    )
}

/// Compile one method of `service` into a [`RequestTemplate`].
///
/// Pure and deterministic: the same declaration always yields an equal
/// template.
///
/// # Errors
/// Returns a [`TemplateError`] naming the offending parameter or placeholder.
pub fn compile(
    service: &ServiceDefinition,
    spec: &MethodSpec,
) -> Result<RequestTemplate, TemplateError> {
    let method_name = spec.name.clone();
    let full_path = match service.base_path.as_deref() {
        Some(base) => join_slash(base, &spec.path),
        None => spec.path.clone(),
    };
    let path = PathTemplate::parse(&method_name, &full_path)?;

    let mut placeholders = HashSet::new();
    for placeholder in path.placeholders() {
        if !placeholders.insert(placeholder) {
            return Err(TemplateError::DuplicatePlaceholder {
                method: method_name,
                placeholder: placeholder.to_owned(),
            });
        }
    }

    let mut bound = HashSet::new();
    let mut body: Option<&str> = None;
    let mut bindings = Vec::with_capacity(spec.params.len());

    for (index, param) in spec.params.iter().enumerate() {
        if param.name.trim().is_empty() {
            return Err(TemplateError::EmptyName {
                method: method_name,
                index,
            });
        }
        match param.kind {
            ParamKind::Path => {
                if !placeholders.contains(param.name.as_str()) {
                    return Err(TemplateError::UnknownPathParameter {
                        method: method_name,
                        param: param.name.clone(),
                    });
                }
                if !bound.insert(param.name.as_str()) {
                    return Err(TemplateError::DuplicatePathBinding {
                        method: method_name,
                        param: param.name.clone(),
                    });
                }
            }
            ParamKind::Body => {
                if let Some(first) = body {
                    return Err(TemplateError::MultipleBodies {
                        method: method_name,
                        first: first.to_owned(),
                        second: param.name.clone(),
                    });
                }
                body = Some(&param.name);
            }
            ParamKind::Query | ParamKind::Header | ParamKind::Custom => {}
        }
        bindings.push(ParamBinding {
            index,
            name: param.name.clone(),
            kind: param.kind,
            value_type: param.value_type,
            required: param.required,
        });
    }

    if let Some(unbound) = path.placeholders().find(|p| !bound.contains(p)) {
        return Err(TemplateError::UnboundPlaceholder {
            method: method_name,
            placeholder: unbound.to_owned(),
        });
    }

    if let Some(body) = body
        && !has_conventional_body(&spec.method)
    {
        tracing::warn!(
            service = %service.name,
            method = %method_name,
            verb = %spec.method,
            param = %body,
            "body parameter bound to a verb without a conventional body"
        );
    }

    let mut headers = Vec::with_capacity(spec.headers.len());
    for (name, value) in &spec.headers {
        let invalid = || TemplateError::InvalidHeader {
            method: method_name.clone(),
            name: name.clone(),
        };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        headers.push((header_name, header_value));
    }

    Ok(RequestTemplate {
        service: service.name.clone(),
        name: method_name,
        method: spec.method.clone(),
        path,
        bindings,
        content_type: spec.content_type.clone(),
        accept: spec.accept.clone(),
        response: spec.response,
        version: spec.version.clone(),
        headers,
    })
}
