use std::collections::HashMap;

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use mime::Mime;

use crate::codec::Payload;
use crate::error::ExchangeError;
use crate::template::{PathSegment, PathTemplate, RequestTemplate};

/// Per-invocation scratch state filled by argument resolvers.
///
/// Owned by exactly one invocation and discarded once the request is built.
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    path_vars: HashMap<String, String>,
    query: Vec<(String, Vec<String>)>,
    headers: HeaderMap,
    body: Option<Payload>,
    content_type: Option<Mime>,
}

impl RequestBuilder {
    #[must_use]
    pub fn new(template: &RequestTemplate) -> Self {
        Self {
            method: template.method().clone(),
            path_vars: HashMap::new(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            content_type: template.content_type().cloned(),
        }
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_path_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.path_vars.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn path_var(&self, name: &str) -> Option<&str> {
        self.path_vars.get(name).map(String::as_str)
    }

    /// Append a query value; repeated names keep their first position and
    /// accumulate values in call order.
    pub fn add_query(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.query.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.query.push((name, vec![value])),
        }
    }

    /// Replace every value of a query parameter.
    pub fn set_query(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.query.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => *values = vec![value],
            None => self.query.push((name, vec![value])),
        }
    }

    #[must_use]
    pub fn query(&self) -> &[(String, Vec<String>)] {
        &self.query
    }

    /// Append a header value, keeping existing values for the same name.
    ///
    /// # Errors
    /// Returns an error for an invalid header name or value.
    pub fn add_header(&mut self, name: &str, value: &str) -> Result<(), ExchangeError> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Replace every value of a header.
    ///
    /// # Errors
    /// Returns an error for an invalid header name or value.
    pub fn insert_header(&mut self, name: &str, value: &str) -> Result<(), ExchangeError> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn set_body(&mut self, payload: Payload) {
        self.body = Some(payload);
    }

    #[must_use]
    pub fn body(&self) -> Option<&Payload> {
        self.body.as_ref()
    }

    pub fn set_content_type(&mut self, media_type: Mime) {
        self.content_type = Some(media_type);
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    pub(crate) fn into_parts(self) -> (HeaderMap, Option<Payload>, Option<Mime>) {
        (self.headers, self.body, self.content_type)
    }

    /// Substitute path variables, percent-encoding each value.
    pub(crate) fn render_path(
        &self,
        method: &str,
        path: &PathTemplate,
    ) -> Result<String, ExchangeError> {
        let mut out = String::with_capacity(path.raw().len());
        for segment in path.segments() {
            match segment {
                PathSegment::Literal(text) => out.push_str(text),
                PathSegment::Placeholder(name) => {
                    let value =
                        self.path_vars
                            .get(name)
                            .ok_or_else(|| ExchangeError::UnresolvedArgument {
                                method: method.to_owned(),
                                param: name.clone(),
                            })?;
                    out.push_str(&urlencoding::encode(value));
                }
            }
        }
        Ok(out)
    }

    /// `a=1&a=2&b=3`, or `None` when no query parameters were bound.
    pub(crate) fn query_string(&self) -> Result<Option<String>, ExchangeError> {
        if self.query.is_empty() {
            return Ok(None);
        }
        let pairs: Vec<(&str, &str)> = self
            .query
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
            .collect();
        serde_urlencoded::to_string(pairs)
            .map(Some)
            .map_err(|e| ExchangeError::Encode(Box::new(e)))
    }
}
