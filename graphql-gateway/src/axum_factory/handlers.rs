use axum::Json;
use axum::body::Body;
use axum::extract::Extension;
use axum::extract::FromRequestParts;
use axum::extract::Request;
use axum::extract::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::response::Response;
use futures::StreamExt;
use http::HeaderMap;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use http::header::SEC_WEBSOCKET_PROTOCOL;
use http::header::UPGRADE;
use http::request::Parts;
use tracing::Instrument;

use super::GatewayState;
use crate::graphql;
use crate::protocols::websocket::WebSocketProtocol;
use crate::protocols::websocket::convert_websocket_stream;
use crate::transport::TransportRequest;
use crate::transport::TransportResponse;

/// Largest request body accepted on POST.
const MAX_REQUEST_BYTES: usize = 2_000_000;

struct TranslateError {
    status: StatusCode,
    extension_code: &'static str,
    extension_details: String,
}

impl IntoResponse for TranslateError {
    fn into_response(self) -> Response {
        let response = graphql::Response::builder()
            .error(
                graphql::Error::builder()
                    .message(format!("Invalid GraphQL request: {}", self.extension_details))
                    .extension_code(self.extension_code)
                    .build(),
            )
            .build();
        (self.status, Json(response)).into_response()
    }
}

pub(super) async fn handle_get(
    Extension(state): Extension<GatewayState>,
    request: Request,
) -> Response {
    let (parts, _body) = request.into_parts();
    if is_websocket_upgrade(&parts.headers) {
        return handle_upgrade(state, parts).await;
    }

    match translate_query_request(&parts) {
        Ok(request) => run_operation(&state, &parts, request).await,
        Err(error) => error.into_response(),
    }
}

pub(super) async fn handle_post(
    Extension(state): Extension<GatewayState>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    if !content_type_is_json(&parts.headers) {
        return TranslateError {
            status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
            extension_code: "INVALID_CONTENT_TYPE",
            extension_details: "the 'content-type' header must be 'application/json' or \
                                'application/graphql-response+json'"
                .to_string(),
        }
        .into_response();
    }
    match translate_bytes_request(body).await {
        Ok(request) => run_operation(&state, &parts, request).await,
        Err(error) => error.into_response(),
    }
}

fn content_type_is_json(headers: &HeaderMap) -> bool {
    headers.get_all(CONTENT_TYPE).iter().any(|value| {
        value
            .to_str()
            .ok()
            .and_then(|value| value.parse::<mime::Mime>().ok())
            .is_some_and(|media_type| {
                media_type.type_() == mime::APPLICATION
                    && (media_type.subtype() == mime::JSON
                        || (media_type.subtype().as_str() == "graphql-response"
                            && media_type.suffix() == Some(mime::JSON)))
            })
    })
}

fn translate_query_request(parts: &Parts) -> Result<graphql::Request, TranslateError> {
    let Some(query) = parts.uri.query() else {
        return Err(TranslateError {
            status: StatusCode::BAD_REQUEST,
            extension_code: "INVALID_GRAPHQL_REQUEST",
            extension_details: "there was no GraphQL operation to execute, use the `query` \
                                parameter or a POST request"
                .to_string(),
        });
    };
    graphql::Request::from_urlencoded_query(query).map_err(|error| TranslateError {
        status: StatusCode::BAD_REQUEST,
        extension_code: "INVALID_GRAPHQL_REQUEST",
        extension_details: format!("failed to decode a valid GraphQL request from path {error}"),
    })
}

async fn translate_bytes_request(body: Body) -> Result<graphql::Request, TranslateError> {
    let bytes = axum::body::to_bytes(body, MAX_REQUEST_BYTES)
        .await
        .map_err(|error| TranslateError {
            status: StatusCode::BAD_REQUEST,
            extension_code: "INVALID_GRAPHQL_REQUEST",
            extension_details: format!("failed to read the request body: {error}"),
        })?;
    serde_json::from_slice(&bytes).map_err(|error| TranslateError {
        status: StatusCode::BAD_REQUEST,
        extension_code: "INVALID_GRAPHQL_REQUEST",
        extension_details: format!("failed to deserialize the request body into JSON: {error}"),
    })
}

/// Runs a query or mutation and answers with its first result.
async fn run_operation(
    state: &GatewayState,
    parts: &Parts,
    request: graphql::Request,
) -> Response {
    let transport_response = TransportResponse::new();
    let mut results = state.invocation.invoke(
        request,
        TransportRequest::from(parts),
        Some(transport_response.clone()),
    );

    let (status, body) = match results.next().await {
        Some(Ok(response)) => (StatusCode::OK, response),
        Some(Err(error)) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_response()),
        None => {
            tracing::debug!("the customizer did not produce any execution");
            let response = graphql::Response::builder()
                .error(
                    graphql::Error::builder()
                        .message("the operation was not executed")
                        .extension_code("OPERATION_NOT_EXECUTED")
                        .build(),
                )
                .build();
            (StatusCode::OK, response)
        }
    };
    drop(results);

    let mut response = (status, Json(body)).into_response();
    transport_response.apply_to(&mut response);
    response
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

async fn handle_upgrade(state: GatewayState, mut parts: Parts) -> Response {
    let Some(connection_handler) = state.connection_handler.clone() else {
        return TranslateError {
            status: StatusCode::BAD_REQUEST,
            extension_code: "SUBSCRIPTIONS_DISABLED",
            extension_details: "subscriptions over WebSocket are disabled".to_string(),
        }
        .into_response();
    };
    let requested = parts.headers.get(SEC_WEBSOCKET_PROTOCOL);
    let Some(protocol) = WebSocketProtocol::negotiate(requested, &state.protocols) else {
        tracing::debug!(?requested, "no acceptable websocket protocol");
        return TranslateError {
            status: StatusCode::BAD_REQUEST,
            extension_code: "UNSUPPORTED_WEBSOCKET_PROTOCOL",
            extension_details: format!(
                "none of the requested websocket protocols is supported, expected one of: {}",
                state
                    .protocols
                    .iter()
                    .map(|protocol| protocol.subprotocol())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
        .into_response();
    };

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };
    let transport_request = TransportRequest::from(&parts);
    let span = tracing::Span::current();
    upgrade
        .protocols([protocol.subprotocol()])
        .on_upgrade(move |socket| {
            async move {
                let (sink, stream) = convert_websocket_stream(socket);
                connection_handler
                    .serve(protocol, transport_request, sink, stream)
                    .await
            }
            .instrument(span)
        })
}
