use std::time::Instant;

use async_trait::async_trait;
use http::HeaderMap;
use http::header::{AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION};

use super::{ExchangeRequest, ExchangeResponse, Interceptor, Next};
use crate::error::ExchangeError;

const REDACTED: &str = "[REDACTED]";

/// Debug-level request/response logging.
///
/// Credentials never reach the log: `Authorization`, `Proxy-Authorization`,
/// `Cookie` and any value marked sensitive are replaced by a placeholder.
/// The request and response pass through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(
        &self,
        request: ExchangeRequest,
        next: Next,
    ) -> Result<ExchangeResponse, ExchangeError> {
        let method = request.method().clone();
        let uri = request.uri().clone();
        tracing::debug!(
            http.method = %method,
            http.url = %uri,
            headers = %render_headers(request.headers()),
            body_len = request.body().len(),
            "sending request"
        );

        let started = Instant::now();
        let result = next.run(request).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(response) => tracing::debug!(
                http.method = %method,
                http.url = %uri,
                http.status_code = response.status().as_u16(),
                body_len = response.body().len(),
                elapsed_ms,
                "received response"
            ),
            Err(err) => tracing::debug!(
                http.method = %method,
                http.url = %uri,
                error = %err,
                elapsed_ms,
                "request failed"
            ),
        }
        result
    }
}

/// `name: value` pairs joined by `, ` with credentials masked.
pub fn render_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            let masked = value.is_sensitive()
                || *name == AUTHORIZATION
                || *name == PROXY_AUTHORIZATION
                || *name == COOKIE;
            if masked {
                format!("{name}: {REDACTED}")
            } else {
                format!("{name}: {}", String::from_utf8_lossy(value.as_bytes()))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::interceptor::{ExchangeService, InterceptorChain};
    use bytes::Bytes;
    use http::HeaderValue;
    use tower::ServiceExt;

    #[test]
    fn test_credentials_are_masked() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(COOKIE, HeaderValue::from_static("session=1"));
        headers.insert("x-trace", HeaderValue::from_static("t-1"));
        let mut secret = HeaderValue::from_static("k");
        secret.set_sensitive(true);
        headers.insert("x-api-key", secret);

        let rendered = render_headers(&headers);
        assert!(!rendered.contains("abc"));
        assert!(!rendered.contains("session"));
        assert!(rendered.contains("x-trace: t-1"));
        assert!(rendered.contains("x-api-key: [REDACTED]"));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_logs_without_leaking_token() {
        let mut chain = InterceptorChain::new();
        chain.push_interceptor(LoggingInterceptor);
        let inner = ExchangeService::new(tower::service_fn(|req: ExchangeRequest| async move {
            assert_eq!(req.headers()[AUTHORIZATION], "Bearer top-secret");
            Ok::<_, ExchangeError>(http::Response::new(Bytes::from_static(b"ok")))
        }));

        let request = http::Request::builder()
            .uri("http://localhost/objects")
            .header(AUTHORIZATION, "Bearer top-secret")
            .body(Bytes::new())
            .unwrap();
        let response = chain.wrap(inner).oneshot(request).await.unwrap();

        assert_eq!(response.body().as_ref(), b"ok");
        assert!(logs_contain("sending request"));
        assert!(logs_contain("received response"));
        assert!(!logs_contain("top-secret"));
    }
}
