use axum::Router;
use axum::body::Body;
use futures::StreamExt;
use futures::stream;
use futures::stream::BoxStream;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde_json_bytes::ByteString;
use serde_json_bytes::json;
use test_log::test;
use tower::BoxError;
use tower::ServiceExt;

use crate::Configuration;
use crate::ExecutionRequest;
use crate::ExecutionRequestCustomizer;
use crate::Gateway;
use crate::HTTP_RESPONSE_CONTEXT_KEY;
use crate::engine::Engine;
use crate::engine::EngineFuture;
use crate::engine::single_response;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::transport::TransportRequest;
use crate::transport::TransportResponse;

/// Echoes the request, or misbehaves depending on the operation name.
struct EchoEngine;

impl Engine for EchoEngine {
    fn execute(&self, request: ExecutionRequest) -> Result<EngineFuture, BoxError> {
        match request.operation_name.as_deref() {
            Some("Fail") => Err("the engine is down".into()),
            Some("Created") => {
                let transport_response = request
                    .context
                    .get::<TransportResponse>(HTTP_RESPONSE_CONTEXT_KEY)
                    .ok_or("missing transport response")?;
                transport_response.set_status(StatusCode::CREATED);
                transport_response
                    .insert_header("x-resolved-by".parse()?, HeaderValue::from_static("echo"));
                Ok(Box::pin(async {
                    Ok(single_response(
                        graphql::Response::builder()
                            .data(json!({ "created": true }))
                            .build(),
                    ))
                }))
            }
            _ => {
                let mut data = Object::new();
                data.insert(ByteString::from("query"), string_or_null(request.query));
                data.insert(
                    ByteString::from("operationName"),
                    string_or_null(request.operation_name),
                );
                data.insert(
                    ByteString::from("variables"),
                    Value::Object(request.variables),
                );
                let response = graphql::Response::builder()
                    .data(Value::Object(data))
                    .build();
                Ok(Box::pin(async move { Ok(single_response(response)) }))
            }
        }
    }
}

fn string_or_null(value: Option<String>) -> Value {
    value
        .map(|value| Value::String(ByteString::from(value)))
        .unwrap_or(Value::Null)
}

struct Veto;

impl ExecutionRequestCustomizer for Veto {
    fn customize(
        &self,
        _request: ExecutionRequest,
        _transport_request: &TransportRequest,
        _transport_response: Option<TransportResponse>,
    ) -> BoxStream<'static, ExecutionRequest> {
        stream::empty().boxed()
    }
}

fn router() -> Router {
    Gateway::builder()
        .engine(EchoEngine)
        .build()
        .unwrap()
        .router()
}

async fn send(
    router: Router,
    request: http::Request<Body>,
) -> (StatusCode, HeaderMap, serde_json::Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, serde_json::from_slice(&body).unwrap())
}

fn post(body: impl Into<Body>) -> http::Request<Body> {
    http::Request::builder()
        .method(Method::POST)
        .uri("/graphql")
        .header(CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

fn upgrade(subprotocol: Option<&str>) -> http::Request<Body> {
    let mut builder = http::Request::builder()
        .method(Method::GET)
        .uri("/graphql")
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==");
    if let Some(subprotocol) = subprotocol {
        builder = builder.header("sec-websocket-protocol", subprotocol);
    }
    builder.body(Body::empty()).unwrap()
}

#[test(tokio::test)]
async fn post_runs_the_operation() {
    let (status, headers, body) = send(
        router(),
        post(r#"{"query":"query Q($x: Int) { x }","operationName":"Q","variables":{"x":1}}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[CONTENT_TYPE], "application/json");
    insta::assert_json_snapshot!(body, @r###"
    {
      "data": {
        "query": "query Q($x: Int) { x }",
        "operationName": "Q",
        "variables": {
          "x": 1
        }
      }
    }
    "###);
}

#[test(tokio::test)]
async fn get_runs_the_operation_from_the_url() {
    let request = http::Request::builder()
        .uri("/graphql?query=%7B%20me%20%7D&variables=%7B%22id%22%3A%222%22%7D")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(router(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["query"], "{ me }");
    assert_eq!(body["data"]["variables"], serde_json::json!({ "id": "2" }));
}

#[test(tokio::test)]
async fn invalid_requests_are_rejected() {
    let (status, _, body) = send(router(), post("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["extensions"]["code"], "INVALID_GRAPHQL_REQUEST");
    assert!(body.get("data").is_none());

    let request = http::Request::builder()
        .uri("/graphql")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(router(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["extensions"]["code"], "INVALID_GRAPHQL_REQUEST");
}

#[test(tokio::test)]
async fn post_requires_a_json_content_type() {
    let request = http::Request::builder()
        .method(Method::POST)
        .uri("/graphql")
        .header(CONTENT_TYPE, "text/plain")
        .body(Body::from(r#"{"query":"{ me }"}"#))
        .unwrap();
    let (status, _, body) = send(router(), request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["errors"][0]["extensions"]["code"], "INVALID_CONTENT_TYPE");

    let request = http::Request::builder()
        .method(Method::POST)
        .uri("/graphql")
        .body(Body::from(r#"{"query":"{ me }"}"#))
        .unwrap();
    let (status, _, _) = send(router(), request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[test(tokio::test)]
async fn engine_failures_are_graphql_errors() {
    let (status, _, body) = send(
        router(),
        post(r#"{"query":"{ down }","operationName":"Fail"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    insta::assert_json_snapshot!(body, @r###"
    {
      "errors": [
        {
          "message": "execution failed: the engine is down",
          "extensions": {
            "code": "EXECUTION_FAILED"
          }
        }
      ]
    }
    "###);
}

#[test(tokio::test)]
async fn resolvers_set_status_and_headers() {
    let (status, headers, body) = send(
        router(),
        post(r#"{"query":"mutation Created { create }","operationName":"Created"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers["x-resolved-by"], "echo");
    assert_eq!(body, serde_json::json!({ "data": { "created": true } }));
}

#[test(tokio::test)]
async fn vetoed_operations_are_reported() {
    let router = Gateway::builder()
        .engine(EchoEngine)
        .customizer(Veto)
        .build()
        .unwrap()
        .router();
    let (status, _, body) = send(router, post(r#"{"query":"{ me }"}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["errors"][0]["extensions"]["code"], "OPERATION_NOT_EXECUTED");
}

#[test(tokio::test)]
async fn configured_path_is_served() {
    let router = Gateway::builder()
        .engine(EchoEngine)
        .configuration_yaml("server:\n  path: /api\n")
        .unwrap()
        .build()
        .unwrap()
        .router();

    let response = router
        .clone()
        .oneshot(post(r#"{"query":"{ me }"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let request = http::Request::builder()
        .method(Method::POST)
        .uri("/api")
        .header(CONTENT_TYPE, "application/graphql-response+json; charset=utf-8")
        .body(Body::from(r#"{"query":"{ me }"}"#))
        .unwrap();
    let (status, _, _) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[test(tokio::test)]
async fn upgrades_need_an_enabled_protocol() {
    let (status, _, body) = send(router(), upgrade(Some("graphql-sse"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["errors"][0]["extensions"]["code"],
        "UNSUPPORTED_WEBSOCKET_PROTOCOL"
    );

    let modern_only = Gateway::builder()
        .engine(EchoEngine)
        .configuration(
            Configuration::builder()
                .subscription(
                    crate::configuration::SubscriptionConfig::builder()
                        .protocols(vec![
                            crate::protocols::websocket::WebSocketProtocol::GraphqlWs,
                        ])
                        .build(),
                )
                .build()
                .unwrap(),
        )
        .build()
        .unwrap()
        .router();
    let (status, _, _) = send(modern_only, upgrade(None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[test(tokio::test)]
async fn upgrades_are_refused_when_subscriptions_are_disabled() {
    let router = Gateway::builder()
        .engine(EchoEngine)
        .configuration_yaml("subscription:\n  enabled: false\n")
        .unwrap()
        .build()
        .unwrap()
        .router();
    let (status, _, body) = send(router, upgrade(Some("graphql-transport-ws"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["extensions"]["code"], "SUBSCRIPTIONS_DISABLED");
}
