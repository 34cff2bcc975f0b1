use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use super::{TlsRoots, Transport, TransportConfig, tls};
use crate::config::ConfigError;
use crate::error::ExchangeError;
use crate::interceptor::{ExchangeRequest, ExchangeResponse};

/// Pooled hyper client over rustls.
///
/// HTTPS only unless [`TransportConfig::allow_insecure_http`] is set.
/// Response bodies are collected up to `max_body_size` bytes.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    max_body_size: usize,
}

impl HyperTransport {
    /// # Errors
    /// Returns [`ConfigError::Transport`] when TLS roots cannot be loaded.
    pub fn new(config: &TransportConfig) -> Result<Self, ConfigError> {
        if config.allow_insecure_http {
            tracing::warn!("insecure HTTP enabled; use only for testing with mock servers");
        }
        let https = https_connector(config.tls_roots, config.allow_insecure_http)?;

        let mut builder = Client::builder(TokioExecutor::new());
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host);
        if let Some(idle) = config.pool_idle_timeout {
            builder.pool_idle_timeout(idle);
        }

        Ok(Self {
            client: builder.build(https),
            max_body_size: config.max_body_size,
        })
    }
}

impl fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HyperTransport")
            .field("max_body_size", &self.max_body_size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: ExchangeRequest) -> Result<ExchangeResponse, ExchangeError> {
        let (parts, body) = request.into_parts();
        let response = self
            .client
            .request(http::Request::from_parts(parts, Full::new(body)))
            .await
            .map_err(|e| ExchangeError::Transport(Box::new(e)))?;

        let (parts, body) = response.into_parts();
        let collected = Limited::new(body, self.max_body_size)
            .collect()
            .await
            .map_err(ExchangeError::Transport)?;
        Ok(http::Response::from_parts(parts, collected.to_bytes()))
    }
}

fn https_connector(
    roots: TlsRoots,
    allow_http: bool,
) -> Result<HttpsConnector<HttpConnector>, ConfigError> {
    match roots {
        TlsRoots::WebPki => {
            let builder = hyper_rustls::HttpsConnectorBuilder::new()
                .with_provider_and_webpki_roots(tls::crypto_provider())
                .map_err(|e| ConfigError::Transport(e.to_string()))?;
            Ok(if allow_http {
                builder.https_or_http().enable_all_versions().build()
            } else {
                builder.https_only().enable_all_versions().build()
            })
        }
        TlsRoots::Native => {
            let client_config = tls::native_roots_client_config().map_err(ConfigError::Transport)?;
            let builder = hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(client_config);
            Ok(if allow_http {
                builder.https_or_http().enable_all_versions().build()
            } else {
                builder.https_only().enable_all_versions().build()
            })
        }
    }
}
