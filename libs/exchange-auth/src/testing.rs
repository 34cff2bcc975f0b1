//! In-process token endpoint for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use exchange_http::{ExchangeError, ExchangeRequest, ExchangeResponse, Transport};
use http::StatusCode;
use parking_lot::Mutex;

/// Answers every call with a fresh `tok-N` / `rt-N` pair valid for one hour,
/// unless a scripted reply or a failure status is queued.
#[derive(Default)]
pub struct StubTokenServer {
    calls: AtomicUsize,
    bodies: Mutex<Vec<String>>,
    script: Mutex<VecDeque<(StatusCode, String)>>,
    failing: Mutex<Option<StatusCode>>,
    delay: Option<Duration>,
}

impl StubTokenServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue one reply ahead of the default behavior.
    pub fn script(&self, status: StatusCode, body: &str) {
        self.script.lock().push_back((status, body.to_owned()));
    }

    pub fn fail_with(&self, status: Option<StatusCode>) {
        *self.failing.lock() = status;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Form body of the `index`-th call.
    pub fn body(&self, index: usize) -> String {
        self.bodies.lock()[index].clone()
    }

    fn reply(&self, n: usize) -> (StatusCode, String) {
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        if let Some(status) = *self.failing.lock() {
            return (status, r#"{"error":"temporarily_unavailable"}"#.to_owned());
        }
        (
            StatusCode::OK,
            format!(
                r#"{{"access_token":"tok-{n}","refresh_token":"rt-{n}","token_type":"Bearer","expires_in":3600}}"#
            ),
        )
    }
}

#[async_trait]
impl Transport for StubTokenServer {
    async fn send(&self, request: ExchangeRequest) -> Result<ExchangeResponse, ExchangeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.bodies
            .lock()
            .push(String::from_utf8_lossy(request.body()).into_owned());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let (status, body) = self.reply(n);
        let mut response = http::Response::new(Bytes::from(body));
        *response.status_mut() = status;
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        Ok(response)
    }
}
