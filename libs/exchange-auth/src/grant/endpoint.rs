use std::fmt;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use exchange_http::{SecretString, Transport};
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderName, HeaderValue, Method, Request};
use serde::Deserialize;
use url::Url;
use zeroize::Zeroizing;

use crate::error::TokenError;
use crate::http_error::format_exchange_error;
use crate::registration::{AuthRegistration, ClientAuthMethod};
use crate::token::TokenResponse;

const CONTEXT: &str = "OAuth2 token";

/// RFC 6749 §5.2 error body.
#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Token endpoint of one registration.
///
/// Posts `application/x-www-form-urlencoded` grant requests over the raw
/// transport (no interceptors) and parses the JSON answer.
pub struct TokenEndpoint {
    registration: String,
    url: Url,
    client_id: String,
    client_secret: SecretString,
    /// Pre-joined scopes (space-separated), `None` when empty.
    scopes: Option<String>,
    auth_method: ClientAuthMethod,
    extra_headers: Vec<(HeaderName, HeaderValue)>,
    transport: Arc<dyn Transport>,
}

impl TokenEndpoint {
    /// # Errors
    /// Returns [`TokenError::Config`] for an invalid extra header.
    pub fn new(
        registration: impl Into<String>,
        config: &AuthRegistration,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, TokenError> {
        let extra_headers = config
            .extra_headers
            .iter()
            .map(|(name, value)| {
                let name = HeaderName::try_from(name.as_str())
                    .map_err(|e| TokenError::Config(format!("extra header `{name}`: {e}")))?;
                let mut value = HeaderValue::try_from(value.as_str())
                    .map_err(|e| TokenError::Config(format!("extra header `{name}`: {e}")))?;
                value.set_sensitive(true);
                Ok((name, value))
            })
            .collect::<Result<Vec<_>, TokenError>>()?;

        let scopes = if config.scopes.is_empty() {
            None
        } else {
            Some(config.scopes.join(" "))
        };

        Ok(Self {
            registration: registration.into(),
            url: config.token_endpoint.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes,
            auth_method: config.auth_method,
            extra_headers,
            transport,
        })
    }

    #[must_use]
    pub fn registration(&self) -> &str {
        &self.registration
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `grant_type=refresh_token` exchange.
    ///
    /// # Errors
    /// See [`request`](Self::request).
    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenResponse, TokenError> {
        let token = Zeroizing::new(refresh_token.expose().to_owned());
        self.request("refresh_token", &[("refresh_token", token.as_str())])
            .await
    }

    /// Post a grant request with `grant_type` plus `fields`, adding scope and
    /// client authentication.
    ///
    /// # Errors
    /// Returns [`TokenError::Http`] for transport failures,
    /// [`TokenError::Status`] for non-2xx answers and
    /// [`TokenError::InvalidResponse`] for an unparseable body.
    pub async fn request(
        &self,
        grant_type: &str,
        fields: &[(&str, &str)],
    ) -> Result<TokenResponse, TokenError> {
        let mut form: Vec<(&str, &str)> = vec![("grant_type", grant_type)];
        form.extend_from_slice(fields);
        if let Some(scope) = &self.scopes {
            form.push(("scope", scope));
        }

        // For Form auth, credentials go into the body. Keep the temporary
        // copy in `Zeroizing` so it is scrubbed on drop.
        let secret_expose;
        if self.auth_method == ClientAuthMethod::Form {
            secret_expose = Zeroizing::new(self.client_secret.expose().to_owned());
            form.push(("client_id", &self.client_id));
            if !secret_expose.is_empty() {
                form.push(("client_secret", &secret_expose));
            }
        }

        let body = Zeroizing::new(
            serde_urlencoded::to_string(&form)
                .map_err(|e| TokenError::InvalidResponse(format!("form encode: {e}")))?,
        );

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(self.url.as_str())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json")
            .body(Bytes::from(body.as_bytes().to_vec()))
            .map_err(|e| TokenError::Config(format!("token request: {e}")))?;

        let headers = request.headers_mut();
        if self.auth_method == ClientAuthMethod::Basic {
            let credentials = Zeroizing::new(format!(
                "{}:{}",
                self.client_id,
                self.client_secret.expose()
            ));
            let encoded = Zeroizing::new(general_purpose::STANDARD.encode(credentials.as_bytes()));
            let mut value = HeaderValue::try_from(format!("Basic {}", &*encoded))
                .map_err(|e| TokenError::Config(format!("client credentials: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        for (name, value) in &self.extra_headers {
            headers.insert(name.clone(), value.clone());
        }

        tracing::debug!(
            registration = %self.registration,
            grant_type,
            endpoint = %self.url,
            "requesting token"
        );
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| TokenError::Http(format_exchange_error(&e, CONTEXT)))?;

        let status = response.status();
        if !status.is_success() {
            let error = serde_json::from_slice::<ErrorResponse>(response.body())
                .ok()
                .map(|e| e.error);
            return Err(TokenError::Status { status, error });
        }

        serde_json::from_slice(response.body())
            .map_err(|e| TokenError::InvalidResponse(e.to_string()))
    }
}

impl fmt::Debug for TokenEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenEndpoint")
            .field("registration", &self.registration)
            .field("url", &self.url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("scopes", &self.scopes)
            .field("auth_method", &self.auth_method)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use exchange_http::{HyperTransport, TransportConfig};
    use httpmock::prelude::*;

    fn registration(server: &MockServer) -> AuthRegistration {
        AuthRegistration::client_credentials(
            Url::parse(&format!("http://localhost:{}/token", server.port())).unwrap(),
            "test-client",
            "test-secret",
        )
    }

    fn endpoint(config: &AuthRegistration) -> TokenEndpoint {
        let transport = HyperTransport::new(&TransportConfig::for_testing()).unwrap();
        TokenEndpoint::new("test", config, Arc::new(transport)).unwrap()
    }

    #[tokio::test]
    async fn test_basic_auth_sends_authorization_header() {
        let server = MockServer::start();
        let expected = format!(
            "Basic {}",
            general_purpose::STANDARD.encode("test-client:test-secret")
        );
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .header("authorization", &expected)
                .header("content-type", "application/x-www-form-urlencoded")
                .body_includes("grant_type=client_credentials")
                .body_excludes("client_secret");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"tok-123","expires_in":3600,"token_type":"Bearer"}"#);
        });

        let resp = endpoint(&registration(&server))
            .request("client_credentials", &[])
            .await
            .unwrap();
        assert_eq!(resp.access_token, "tok-123");
        assert_eq!(resp.expires_in, Some(3600));
        mock.assert();
    }

    #[tokio::test]
    async fn test_form_auth_puts_credentials_in_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("client_id=test-client")
                .body_includes("client_secret=test-secret");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"tok-form"}"#);
        });
        let no_basic = server.mock(|when, then| {
            when.method(POST).path("/token").header_exists("authorization");
            then.status(500);
        });

        let config = registration(&server).with_auth_method(ClientAuthMethod::Form);
        let resp = endpoint(&config)
            .request("client_credentials", &[])
            .await
            .unwrap();
        assert_eq!(resp.access_token, "tok-form");
        mock.assert();
        assert_eq!(no_basic.calls(), 0);
    }

    #[tokio::test]
    async fn test_scopes_are_space_joined() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("scope=read+write");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"tok"}"#);
        });

        let config = registration(&server).with_scopes(["read", "write"]);
        endpoint(&config)
            .request("client_credentials", &[])
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_extra_headers_are_sent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/token").header("x-vendor", "acme");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"tok"}"#);
        });

        let mut config = registration(&server);
        config
            .extra_headers
            .insert("x-vendor".into(), "acme".into());
        endpoint(&config)
            .request("client_credentials", &[])
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_refresh_posts_refresh_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_includes("grant_type=refresh_token")
                .body_includes("refresh_token=rt-1");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"access_token":"tok-2","refresh_token":"rt-2"}"#);
        });

        let resp = endpoint(&registration(&server))
            .refresh(&SecretString::new("rt-1"))
            .await
            .unwrap();
        assert_eq!(resp.refresh_token.as_deref(), Some("rt-2"));
        mock.assert();
    }

    #[tokio::test]
    async fn test_error_status_carries_oauth_code() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(400)
                .header("content-type", "application/json")
                .body(r#"{"error":"invalid_grant","error_description":"expired"}"#);
        });

        let err = endpoint(&registration(&server))
            .request("client_credentials", &[])
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                TokenError::Status { status, ref error }
                    if status == http::StatusCode::BAD_REQUEST && error.as_deref() == Some("invalid_grant")
            ),
            "{err}"
        );
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_garbage_body_is_invalid_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200).body("<html>");
        });

        let err = endpoint(&registration(&server))
            .request("client_credentials", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::InvalidResponse(_)), "{err}");
    }

    #[test]
    fn test_bad_extra_header_is_config_error() {
        let mut config = AuthRegistration::client_credentials(
            Url::parse("https://idp.example.com/token").unwrap(),
            "id",
            "secret",
        );
        config
            .extra_headers
            .insert("bad header".into(), "v".into());
        let transport = HyperTransport::new(&TransportConfig::for_testing()).unwrap();
        let err = TokenEndpoint::new("test", &config, Arc::new(transport)).unwrap_err();
        assert!(matches!(err, TokenError::Config(_)));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = AuthRegistration::client_credentials(
            Url::parse("https://idp.example.com/token").unwrap(),
            "id",
            "super-secret",
        );
        let transport = HyperTransport::new(&TransportConfig::for_testing()).unwrap();
        let endpoint = TokenEndpoint::new("test", &config, Arc::new(transport)).unwrap();
        assert!(!format!("{endpoint:?}").contains("super-secret"));
    }
}
