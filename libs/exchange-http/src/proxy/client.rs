use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use mime::Mime;
use serde::de::DeserializeOwned;
use tower::ServiceExt;

use super::outcome::Outcome;
use crate::codec::Direction;
use crate::error::{BoxError, ExchangeError};
use crate::interceptor::{ExchangeRequest, ExchangeResponse, ExchangeService};
use crate::policy::{CallOptions, GroupProfile, RequestPolicy};
use crate::request::RequestBuilder;
use crate::resolver::{Arg, ArgumentResolvers};
use crate::template::{RequestTemplate, ValueType, join_slash};

/// Live stub for one service declaration bound to one group.
///
/// Cheap to clone; every invocation builds its own request and never
/// mutates the shared templates or group profile.
#[derive(Clone)]
pub struct ClientProxy {
    service: String,
    methods: HashMap<String, Arc<RequestTemplate>>,
    profile: Arc<GroupProfile>,
    exchange: ExchangeService,
    resolvers: ArgumentResolvers,
}

impl ClientProxy {
    pub(crate) fn new(
        service: String,
        methods: HashMap<String, Arc<RequestTemplate>>,
        profile: Arc<GroupProfile>,
        exchange: ExchangeService,
        resolvers: ArgumentResolvers,
    ) -> Self {
        Self {
            service,
            methods,
            profile,
            exchange,
            resolvers,
        }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn group(&self) -> &GroupProfile {
        &self.profile
    }

    /// Compiled template of `method`.
    ///
    /// # Errors
    /// Returns [`ExchangeError::UnknownMethod`] when the service has no such
    /// method.
    pub fn template(&self, method: &str) -> Result<&Arc<RequestTemplate>, ExchangeError> {
        self.methods
            .get(method)
            .ok_or_else(|| ExchangeError::UnknownMethod {
                service: self.service.clone(),
                method: method.to_owned(),
            })
    }

    /// Invoke `method` with default call options.
    ///
    /// # Errors
    /// See [`invoke_with`](Self::invoke_with).
    pub async fn invoke<T>(&self, method: &str, args: Vec<Arg>) -> Result<Outcome<T>, ExchangeError>
    where
        T: DeserializeOwned + 'static,
    {
        self.invoke_with(method, args, CallOptions::default()).await
    }

    /// Invoke `method`, decoding a successful body as `T`.
    ///
    /// HTTP error statuses, connection failures and timeouts come back as
    /// `Ok` with the matching [`Outcome`].
    ///
    /// # Errors
    /// Returns `Err` for failures that are not HTTP outcomes: unknown method,
    /// response type mismatch, unresolved argument, encode or decode failure,
    /// credential errors, cancellation and interceptor-mapped errors.
    pub async fn invoke_with<T>(
        &self,
        method: &str,
        args: Vec<Arg>,
        options: CallOptions,
    ) -> Result<Outcome<T>, ExchangeError>
    where
        T: DeserializeOwned + 'static,
    {
        let template = self.template(method)?;
        check_response_type::<T>(template)?;
        let cancellation = options.cancellation.clone();
        if cancellation.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(ExchangeError::Cancelled);
        }

        let policy = self.profile.effective_policy(template, &options)?;
        let request = self.build_request(template, &args, &policy)?;
        tracing::debug!(
            service = %self.service,
            method,
            group = self.profile.name(),
            version = policy.version.as_deref(),
            "invoking"
        );

        let exchange = tokio::time::timeout(policy.timeout, self.exchange.clone().oneshot(request));
        let result = match &cancellation {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => return Err(ExchangeError::Cancelled),
                result = exchange => result,
            },
            None => exchange.await,
        };

        let response = match result {
            Err(_elapsed) => {
                return Ok(Outcome::TransportError(ExchangeError::Timeout(policy.timeout)));
            }
            Ok(Err(err)) => return Outcome::from_error(err),
            Ok(Ok(response)) => response,
        };

        if cancellation.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(ExchangeError::Cancelled);
        }
        self.decode(template, &response).map(Outcome::Success)
    }

    fn build_request(
        &self,
        template: &RequestTemplate,
        args: &[Arg],
        policy: &RequestPolicy,
    ) -> Result<ExchangeRequest, ExchangeError> {
        let mut builder = RequestBuilder::new(template);
        self.resolvers.resolve_all(template, args, &mut builder)?;
        if let Some(version) = &policy.version {
            policy.version_inserter.insert(version, &mut builder)?;
        }

        let path = builder.render_path(template.name(), template.path())?;
        let query = builder.query_string()?;
        let (bound_headers, payload, content_type) = builder.into_parts();

        let mut headers = policy.headers.clone();
        merge_bound_headers(&mut headers, bound_headers);

        if !headers.contains_key(ACCEPT)
            && let Some(accept) = self.accept_header(template)
        {
            headers.insert(ACCEPT, accept);
        }

        let codecs = self.profile.codecs();
        let body = match payload {
            None => Bytes::new(),
            Some(payload) => {
                let (codec, media) = match content_type {
                    Some(declared) => {
                        let codec = codecs.select(
                            std::slice::from_ref(&declared),
                            payload.value_type(),
                            Direction::Encode,
                        )?;
                        (codec, declared)
                    }
                    None => codecs.writer_for(payload.value_type())?,
                };
                let bytes = codec.encode(&payload).map_err(ExchangeError::Encode)?;
                headers.insert(CONTENT_TYPE, HeaderValue::from_str(media.as_ref())?);
                bytes
            }
        };

        let mut url = join_slash(policy.base_url.as_str(), &path);
        if let Some(query) = query {
            url.push('?');
            url.push_str(&query);
        }
        let uri = http::Uri::try_from(url.as_str()).map_err(|e| ExchangeError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let mut request = http::Request::new(body);
        *request.method_mut() = template.method().clone();
        *request.uri_mut() = uri;
        *request.headers_mut() = headers;
        Ok(request)
    }

    fn accept_header(&self, template: &RequestTemplate) -> Option<HeaderValue> {
        let declared = template.accept();
        let media: Vec<Mime> = if declared.is_empty() {
            if template.response().is_unit() {
                return None;
            }
            self.profile.codecs().readable_media_types(template.response())
        } else {
            declared.to_vec()
        };
        if media.is_empty() {
            return None;
        }
        let joined = media.iter().map(Mime::essence_str).collect::<Vec<_>>().join(", ");
        HeaderValue::from_str(&joined).ok()
    }

    fn decode<T>(&self, template: &RequestTemplate, response: &ExchangeResponse) -> Result<T, ExchangeError>
    where
        T: DeserializeOwned + 'static,
    {
        let value_type = template.response();
        let decode_error = |media_type: String, source: BoxError| ExchangeError::Decode {
            value_type: value_type.name(),
            media_type,
            source,
        };

        if value_type.is_unit() || response.body().is_empty() {
            return serde_json::from_value(serde_json::Value::Null)
                .map_err(|e| decode_error("(empty body)".to_owned(), Box::new(e)));
        }

        let candidates = response_media_types(response.headers(), template);
        let codec = self
            .profile
            .codecs()
            .select(&candidates, value_type, Direction::Decode)?;
        let media = candidates
            .iter()
            .map(Mime::essence_str)
            .collect::<Vec<_>>()
            .join(", ");
        let value = codec
            .decode(response.body(), value_type)
            .map_err(|e| decode_error(media.clone(), e))?;
        serde_json::from_value(value).map_err(|e| decode_error(media, Box::new(e)))
    }
}

impl fmt::Debug for ClientProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        methods.sort_unstable();
        f.debug_struct("ClientProxy")
            .field("service", &self.service)
            .field("group", &self.profile.name())
            .field("methods", &methods)
            .finish_non_exhaustive()
    }
}

fn check_response_type<T: 'static>(template: &RequestTemplate) -> Result<(), ExchangeError> {
    let declared = template.response();
    if declared == ValueType::of::<T>() {
        return Ok(());
    }
    Err(ExchangeError::ResponseTypeMismatch {
        method: template.name().to_owned(),
        declared: declared.name(),
        requested: std::any::type_name::<T>(),
    })
}

/// Argument-bound headers replace same-named policy headers.
fn merge_bound_headers(headers: &mut HeaderMap, bound: HeaderMap) {
    let mut current = None;
    for (name, value) in bound {
        if let Some(name) = name {
            headers.remove(&name);
            current = Some(name);
        }
        if let Some(name) = &current {
            headers.append(name.clone(), value);
        }
    }
}

/// The response `Content-Type`, else the declared `Accept`, else `*/*`.
fn response_media_types(headers: &HeaderMap, template: &RequestTemplate) -> Vec<Mime> {
    if let Some(content_type) = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Mime>().ok())
    {
        return vec![content_type];
    }
    if template.accept().is_empty() {
        vec![mime::STAR_STAR]
    } else {
        template.accept().to_vec()
    }
}
