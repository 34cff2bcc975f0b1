#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end engine behavior against an in-process stub transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use exchange_http::{
    Arg, AuthBinding, CallOptions, Codec, ConfigError, Direction, ExchangeConfig, ExchangeError,
    ExchangeRequest, ExchangeResponse, GroupConfig, Interceptor, MethodSpec, Next, Outcome,
    ParamBinding, ParamSpec, Payload, ProxyFactory, RequestBuilder, SecretString,
    ServiceDefinition, Transport, TypedArgumentResolver, ValueType, VersionInserter,
};
use http::StatusCode;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use mime::Mime;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Object {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct NewObject {
    name: String,
}

struct ObjectSearch {
    name: Option<String>,
    color: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Problem {
    code: String,
}

type Handler = Arc<dyn Fn(&ExchangeRequest) -> ExchangeResponse + Send + Sync>;

/// What the transport received.
#[derive(Clone, Debug)]
struct Recorded {
    method: http::Method,
    uri: http::Uri,
    headers: http::HeaderMap,
    body: Bytes,
}

impl Recorded {
    fn method(&self) -> &http::Method {
        &self.method
    }

    fn uri(&self) -> &http::Uri {
        &self.uri
    }

    fn headers(&self) -> &http::HeaderMap {
        &self.headers
    }

    fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Records every request and answers with a fixed handler.
#[derive(Clone)]
struct StubTransport {
    handler: Handler,
    delay: Option<Duration>,
    seen: Arc<Mutex<Vec<Recorded>>>,
}

impl StubTransport {
    fn new(handler: impl Fn(&ExchangeRequest) -> ExchangeResponse + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            delay: None,
            seen: Arc::default(),
        }
    }

    fn json(status: u16, body: &'static str) -> Self {
        Self::new(move |_| {
            http::Response::builder()
                .status(status)
                .header(CONTENT_TYPE, "application/json")
                .body(Bytes::from_static(body.as_bytes()))
                .unwrap()
        })
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::json(200, "[]")
        }
    }

    fn last(&self) -> Recorded {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }

    fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, request: ExchangeRequest) -> Result<ExchangeResponse, ExchangeError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = (self.handler)(&request);
        let (parts, body) = request.into_parts();
        self.seen.lock().unwrap().push(Recorded {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        });
        Ok(response)
    }
}

fn config() -> ExchangeConfig {
    let mut config = ExchangeConfig::default();
    config.groups.insert(
        "objects".to_owned(),
        GroupConfig {
            base_url: Some("http://objects.test/api/".to_owned()),
            version: Some("1.0".to_owned()),
            ..GroupConfig::default()
        },
    );
    config.groups.insert(
        "httpbin".to_owned(),
        GroupConfig {
            base_url: Some("http://httpbin.test".to_owned()),
            version: Some("1.0".to_owned()),
            version_inserter: Some(VersionInserter::QueryParam("api-version".to_owned())),
            auth: AuthBinding::Basic {
                username: "user".to_owned(),
                password: SecretString::new("passwd"),
            },
            ..GroupConfig::default()
        },
    );
    config
}

fn objects_service() -> ServiceDefinition {
    ServiceDefinition::new("objects")
        .method(
            MethodSpec::get("get", "/objects/{id}")
                .param(ParamSpec::path("id"))
                .returns::<Object>(),
        )
        .method(
            MethodSpec::get("by_ids", "/objects")
                .param(ParamSpec::query("id"))
                .returns::<Vec<Object>>(),
        )
        .method(
            MethodSpec::get("search", "/objects")
                .param(ParamSpec::custom::<ObjectSearch>("search"))
                .returns::<Vec<Object>>(),
        )
        .method(
            MethodSpec::post("create", "/objects")
                .param(ParamSpec::body::<NewObject>("object"))
                .returns::<Object>(),
        )
        .method(
            MethodSpec::delete("delete", "/objects/{id}")
                .param(ParamSpec::path("id"))
                .returns_nothing(),
        )
        .method(MethodSpec::get("list", "/objects").returns::<Vec<Object>>())
        .method(
            MethodSpec::get("list_v2", "/objects")
                .version("2.0.0")
                .returns::<Vec<Object>>(),
        )
}

fn search_resolver() -> TypedArgumentResolver<
    ObjectSearch,
    impl Fn(&ObjectSearch, &ParamBinding, &mut RequestBuilder) -> Result<(), ExchangeError>
    + Send
    + Sync
    + 'static,
> {
    TypedArgumentResolver::new(
        |search: &ObjectSearch, _: &ParamBinding, builder: &mut RequestBuilder| {
            for (key, value) in [("name", &search.name), ("color", &search.color)] {
                if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                    builder.add_query(key, v);
                }
            }
            Ok(())
        },
    )
}

fn factory(transport: StubTransport) -> ProxyFactory {
    ProxyFactory::builder()
        .config(config())
        .transport(transport)
        .argument_resolver(search_resolver())
        .build()
        .unwrap()
}

#[tokio::test]
async fn get_by_id_decodes_success() {
    let transport = StubTransport::json(200, r#"{"id":"123","name":"Test Object"}"#);
    let client = factory(transport.clone())
        .create_client(&objects_service(), "objects")
        .unwrap();

    let outcome = client
        .invoke::<Object>("get", vec![Arg::value("123")])
        .await
        .unwrap();
    let object = outcome.success().unwrap();
    assert_eq!(object.id, "123");
    assert_eq!(object.name, "Test Object");

    let request = transport.last();
    assert_eq!(request.method(), &http::Method::GET);
    assert_eq!(request.uri(), "http://objects.test/api/objects/123");
    assert_eq!(request.headers()[ACCEPT], "application/json");
    assert_eq!(request.headers()["x-api-version"], "1.0");
    assert!(request.headers().contains_key(http::header::USER_AGENT));
}

#[tokio::test]
async fn delete_without_body_succeeds_on_204() {
    let transport = StubTransport::new(|_| {
        http::Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Bytes::new())
            .unwrap()
    });
    let client = factory(transport.clone())
        .create_client(&objects_service(), "objects")
        .unwrap();

    let outcome = client.invoke::<()>("delete", vec!["9".into()]).await.unwrap();
    assert!(outcome.is_success());
    let request = transport.last();
    assert_eq!(request.method(), &http::Method::DELETE);
    assert!(!request.headers().contains_key(ACCEPT));
}

#[tokio::test]
async fn search_with_empty_fields_hits_bare_path() {
    let transport = StubTransport::json(200, "[]");
    let client = factory(transport.clone())
        .create_client(&objects_service(), "objects")
        .unwrap();

    let search = ObjectSearch {
        name: None,
        color: None,
    };
    let outcome = client
        .invoke::<Vec<Object>>("search", vec![Arg::custom(search)])
        .await
        .unwrap();
    assert_eq!(outcome.success().unwrap(), Vec::new());
    assert_eq!(transport.last().uri().path(), "/api/objects");
    assert_eq!(transport.last().uri().query(), None);

    let search = ObjectSearch {
        name: Some("Apple".to_owned()),
        color: Some("red".to_owned()),
    };
    client
        .invoke::<Vec<Object>>("search", vec![Arg::custom(search)])
        .await
        .unwrap();
    assert_eq!(transport.last().uri().query(), Some("name=Apple&color=red"));
}

#[tokio::test]
async fn repeated_query_values_keep_order() {
    let transport = StubTransport::json(200, "[]");
    let client = factory(transport.clone())
        .create_client(&objects_service(), "objects")
        .unwrap();

    client
        .invoke::<Vec<Object>>("by_ids", vec![Arg::values(["3", "5", "10"])])
        .await
        .unwrap();
    assert_eq!(transport.last().uri().query(), Some("id=3&id=5&id=10"));
}

#[tokio::test]
async fn method_version_beats_group_default() {
    let transport = StubTransport::json(200, "[]");
    let client = factory(transport.clone())
        .create_client(&objects_service(), "objects")
        .unwrap();

    client.invoke::<Vec<Object>>("list_v2", vec![]).await.unwrap();
    assert_eq!(transport.last().headers()["x-api-version"], "2.0.0");

    client
        .invoke_with::<Vec<Object>>("list_v2", vec![], CallOptions::new().version("3.0"))
        .await
        .unwrap();
    assert_eq!(transport.last().headers()["x-api-version"], "2.0.0");

    client
        .invoke_with::<Vec<Object>>("list_v2", vec![], CallOptions::new().force_version("3.0"))
        .await
        .unwrap();
    assert_eq!(transport.last().headers()["x-api-version"], "3.0");

    // the per-call override did not stick
    client.invoke::<Vec<Object>>("list", vec![]).await.unwrap();
    assert_eq!(transport.last().headers()["x-api-version"], "1.0");
}

#[tokio::test]
async fn post_body_is_json_encoded() {
    let transport = StubTransport::json(201, r#"{"id":"7","name":"Pear"}"#);
    let client = factory(transport.clone())
        .create_client(&objects_service(), "objects")
        .unwrap();

    let body = Arg::body(&NewObject {
        name: "Pear".to_owned(),
    })
    .unwrap();
    let created = client
        .invoke::<Object>("create", vec![body])
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(created.id, "7");

    let request = transport.last();
    assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
    assert_eq!(request.body().as_ref(), br#"{"name":"Pear"}"#);
}

#[tokio::test]
async fn http_errors_become_outcomes() {
    let client = factory(StubTransport::json(404, r#"{"code":"NOT_FOUND"}"#))
        .create_client(&objects_service(), "objects")
        .unwrap();
    let outcome = client.invoke::<Object>("get", vec!["1".into()]).await.unwrap();
    let Outcome::ClientError(failure) = outcome else {
        panic!("expected a client error outcome");
    };
    assert_eq!(failure.status, StatusCode::NOT_FOUND);
    assert_eq!(failure.payload_as::<Problem>().unwrap().code, "NOT_FOUND");

    let client = factory(StubTransport::json(503, r#"{"code":"DOWN"}"#))
        .create_client(&objects_service(), "objects")
        .unwrap();
    let outcome = client.invoke::<Object>("get", vec!["1".into()]).await.unwrap();
    assert_eq!(outcome.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert!(matches!(
        outcome.into_result(),
        Err(ExchangeError::ServerError(_))
    ));
}

#[tokio::test]
async fn undecodable_success_body_is_a_decode_error() {
    let client = factory(StubTransport::json(200, "not json"))
        .create_client(&objects_service(), "objects")
        .unwrap();
    let err = client
        .invoke::<Object>("get", vec!["1".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::Decode { .. }), "{err}");
}

#[tokio::test]
async fn caller_errors_are_reported_before_sending() {
    let transport = StubTransport::json(200, "{}");
    let client = factory(transport.clone())
        .create_client(&objects_service(), "objects")
        .unwrap();

    assert!(matches!(
        client.invoke::<Object>("missing", vec![]).await,
        Err(ExchangeError::UnknownMethod { .. })
    ));
    assert!(matches!(
        client.invoke::<String>("get", vec!["1".into()]).await,
        Err(ExchangeError::ResponseTypeMismatch { .. })
    ));
    assert!(matches!(
        client.invoke::<Object>("get", vec![Arg::Null]).await,
        Err(ExchangeError::UnresolvedArgument { .. })
    ));
    assert_eq!(transport.count(), 0);
}

#[tokio::test]
async fn slow_call_times_out_as_transport_outcome() {
    let client = factory(StubTransport::slow(Duration::from_secs(5)))
        .create_client(&objects_service(), "objects")
        .unwrap();
    let outcome = client
        .invoke_with::<Vec<Object>>(
            "list",
            vec![],
            CallOptions::new().timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        Outcome::TransportError(ExchangeError::Timeout(d)) if d == Duration::from_millis(50)
    ));
}

#[tokio::test]
async fn cancellation_aborts_in_flight_call() {
    let client = factory(StubTransport::slow(Duration::from_secs(5)))
        .create_client(&objects_service(), "objects")
        .unwrap();
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = client
        .invoke_with::<Vec<Object>>("list", vec![], CallOptions::new().cancellation(token))
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::Cancelled));
}

/// Claims JSON for strings and wraps the raw body.
struct Bracketing;

impl Codec for Bracketing {
    fn name(&self) -> &'static str {
        "bracketing"
    }

    fn media_types(&self) -> &[Mime] {
        std::slice::from_ref(&mime::APPLICATION_JSON)
    }

    fn supports_type(&self, value_type: ValueType, _: Direction) -> bool {
        value_type.is::<String>()
    }

    fn encode(&self, payload: &Payload) -> Result<Bytes, exchange_http::BoxError> {
        Ok(Bytes::from(payload.value().to_string()))
    }

    fn decode(&self, body: &[u8], _: ValueType) -> Result<serde_json::Value, exchange_http::BoxError> {
        Ok(format!("<<{}>>", String::from_utf8_lossy(body)).into())
    }
}

#[tokio::test]
async fn group_codec_override_claims_json() {
    let factory = ProxyFactory::builder()
        .config(config())
        .transport(StubTransport::json(200, r#"{"a":1}"#))
        .configure_group("objects", |g| {
            g.codec(Bracketing);
        })
        .build()
        .unwrap();
    let raw = ServiceDefinition::new("raw").method(
        MethodSpec::get("fetch", "/raw")
            .accept(mime::APPLICATION_JSON)
            .returns::<String>(),
    );

    let text = factory
        .create_client(&raw, "objects")
        .unwrap()
        .invoke::<String>("fetch", vec![])
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(text, r#"<<{"a":1}>>"#);

    // other groups keep the built-in JSON codec
    let err = factory
        .create_client(&raw, "httpbin")
        .unwrap()
        .invoke::<String>("fetch", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::Decode { .. }));
}

#[derive(Debug, thiserror::Error)]
#[error("object not found")]
struct ObjectNotFound;

/// Maps 404 into a domain error.
struct NotFoundMapper;

#[async_trait]
impl Interceptor for NotFoundMapper {
    async fn intercept(
        &self,
        request: ExchangeRequest,
        next: Next,
    ) -> Result<ExchangeResponse, ExchangeError> {
        match next.run(request).await {
            Err(err) if err.status() == Some(StatusCode::NOT_FOUND) => {
                Err(ExchangeError::mapped(ObjectNotFound))
            }
            other => other,
        }
    }
}

#[tokio::test]
async fn interceptor_remaps_classified_error() {
    let factory = ProxyFactory::builder()
        .config(config())
        .transport(StubTransport::json(404, "{}"))
        .configure_group("objects", |g| {
            g.interceptor(NotFoundMapper);
        })
        .build()
        .unwrap();
    let err = factory
        .create_client(&objects_service_without_search(), "objects")
        .unwrap()
        .invoke::<Object>("get", vec!["1".into()])
        .await
        .unwrap_err();
    let ExchangeError::Mapped(inner) = err else {
        panic!("expected a mapped error");
    };
    assert!(inner.downcast_ref::<ObjectNotFound>().is_some());
}

fn objects_service_without_search() -> ServiceDefinition {
    ServiceDefinition::new("plain-objects").method(
        MethodSpec::get("get", "/objects/{id}")
            .param(ParamSpec::path("id"))
            .returns::<Object>(),
    )
}

#[tokio::test]
async fn basic_auth_query_version_and_base_path() {
    let transport = StubTransport::json(200, r#"{"authenticated":true}"#);
    let client = factory(transport.clone())
        .create_client(
            &ServiceDefinition::new("httpbin").base_path("/basic-auth").method(
                MethodSpec::get("check", "/{user}/{passwd}")
                    .param(ParamSpec::path("user"))
                    .param(ParamSpec::path("passwd"))
                    .returns::<serde_json::Value>(),
            ),
            "httpbin",
        )
        .unwrap();

    let body = client
        .invoke::<serde_json::Value>("check", vec!["user".into(), "passwd".into()])
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(body["authenticated"], true);

    let request = transport.last();
    assert_eq!(
        request.uri(),
        "http://httpbin.test/basic-auth/user/passwd?api-version=1.0"
    );
    assert_eq!(request.headers()[AUTHORIZATION], "Basic dXNlcjpwYXNzd2Q=");
    assert!(!request.headers().contains_key("x-api-version"));
}

#[tokio::test]
async fn auth_hook_wraps_registration_groups() {
    let mut config = config();
    config.groups.insert(
        "secured".to_owned(),
        GroupConfig {
            base_url: Some("http://secured.test".to_owned()),
            auth: AuthBinding::Registration("svc-client".to_owned()),
            ..GroupConfig::default()
        },
    );

    let err = ProxyFactory::builder()
        .config(config.clone())
        .transport(StubTransport::json(200, "[]"))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        ExchangeError::Config(ConfigError::MissingAuthLayer { ref registration, .. }) if registration == "svc-client"
    ));

    let transport = StubTransport::json(200, "[]");
    let factory = ProxyFactory::builder()
        .config(config)
        .transport(transport.clone())
        .with_auth_layer(|_group, registration, inner| {
            let token = format!("Bearer for-{registration}");
            Ok(exchange_http::ExchangeService::new(
                tower::util::MapRequest::new(inner, move |mut req: ExchangeRequest| {
                    req.headers_mut()
                        .insert(AUTHORIZATION, token.parse().unwrap());
                    req
                }),
            ))
        })
        .build()
        .unwrap();
    factory
        .create_client(&objects_service_without_search(), "secured")
        .unwrap()
        .invoke::<Object>("get", vec!["1".into()])
        .await
        .ok();
    assert_eq!(transport.last().headers()[AUTHORIZATION], "Bearer for-svc-client");
}

#[tokio::test]
async fn build_time_validation() {
    let err = ProxyFactory::builder()
        .config(config())
        .transport(StubTransport::json(200, "{}"))
        .configure_group("nope", |_| {})
        .build()
        .unwrap_err();
    assert!(matches!(err, ExchangeError::Config(ConfigError::UnknownGroup(_))));

    // custom parameter type without a resolver
    let factory = ProxyFactory::builder()
        .config(config())
        .transport(StubTransport::json(200, "{}"))
        .build()
        .unwrap();
    assert!(matches!(
        factory.create_client(&objects_service(), "objects"),
        Err(ExchangeError::UnresolvedArgument { .. })
    ));
    assert!(matches!(
        factory.create_client(&objects_service_without_search(), "missing"),
        Err(ExchangeError::Config(ConfigError::UnknownGroup(_)))
    ));
}

#[tokio::test]
async fn clients_share_compiled_templates() {
    let factory = factory(StubTransport::json(200, "[]"));
    factory.create_client(&objects_service(), "objects").unwrap();
    let cached = factory.template_cache().len();
    factory.create_client(&objects_service(), "httpbin").unwrap();
    assert_eq!(factory.template_cache().len(), cached);
}
