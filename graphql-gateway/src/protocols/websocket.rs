//! Implements the server side of the GraphQL over WebSocket protocols.
//!
//! Both protocols decode to the same [`ClientMessage`] values and encode the same
//! [`ServerMessage`] values, so a single state machine (see [`super::connection`]) serves them.
//! What differs is the framing and how violations are reported, which is what
//! [`WebSocketProtocol`] captures.

use axum::extract::ws::CloseFrame;
use axum::extract::ws::Message;
use axum::extract::ws::WebSocket;
use futures::Sink;
use futures::SinkExt;
use futures::Stream;
use futures::StreamExt;
use futures::future;
use http::HeaderValue;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::Value;

use crate::error::ProtocolError;
use crate::graphql;

/// The WebSocket subprotocol name for the modern graphql-ws protocol.
/// See [`WebSocketProtocol::GraphqlWs`].
pub const GRAPHQL_WS_SUBPROTOCOL: &str = "graphql-transport-ws";
/// The WebSocket subprotocol name for the legacy subscriptions-transport-ws protocol.
/// See [`WebSocketProtocol::SubscriptionsTransportWs`].
pub const SUBSCRIPTIONS_TRANSPORT_WS_SUBPROTOCOL: &str = "graphql-ws";

/// Close frame reasons are limited to 123 bytes.
const MAX_CLOSE_REASON_LEN: usize = 123;
/// Status reported when the peer closed without a close frame.
const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebSocketProtocol {
    /// The modern graphql-ws protocol. The subprotocol name is "graphql-transport-ws".
    ///
    /// Protocol: https://github.com/enisdenjo/graphql-ws/blob/0c0eb499c3a0278c6d9cc799064f22c5d24d2f60/PROTOCOL.md
    GraphqlWs,
    /// The legacy subscriptions-transport-ws protocol. Confusingly, the subprotocol name is
    /// "graphql-ws".
    ///
    /// https://github.com/apollographql/subscriptions-transport-ws/blob/36f3f6f780acc1a458b768db13fd39c65e5e6518/PROTOCOL.md
    SubscriptionsTransportWs,
}

impl From<WebSocketProtocol> for HeaderValue {
    fn from(value: WebSocketProtocol) -> Self {
        HeaderValue::from_static(value.subprotocol())
    }
}

impl std::fmt::Display for WebSocketProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.subprotocol())
    }
}

/// WebSocket messages sent by the client, once decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// A new connection.
    ConnectionInit {
        /// Optional init payload from the client.
        payload: Option<Value>,
    },
    /// Start of an operation: `start` (legacy) or `subscribe` (modern).
    Start {
        /// Client-chosen operation id.
        id: String,
        payload: graphql::Request,
    },
    /// End of an operation requested by the client: `stop` (legacy) or `complete` (modern).
    Stop {
        /// Client-chosen operation id.
        id: String,
    },
    /// Connection terminated by the client, only used in the subscriptions-transport-ws protocol.
    ConnectionTerminate,
    /// Only used in the graphql-ws protocol.
    Ping { payload: Option<Value> },
    /// Only used in the graphql-ws protocol.
    Pong { payload: Option<Value> },
}

/// WebSocket messages sent by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ConnectionAck,
    /// Connection-level failure, only used in the subscriptions-transport-ws protocol.
    ConnectionError { payload: graphql::Error },
    /// Has type "next" in the graphql-ws protocol, and type "data" in the
    /// subscriptions-transport-ws protocol.
    Data {
        id: String,
        payload: graphql::Response,
    },
    Error {
        id: String,
        payload: Vec<graphql::Error>,
    },
    Complete { id: String },
    /// `ka`, only used in the subscriptions-transport-ws protocol.
    KeepAlive,
    Ping { payload: Option<Value> },
    Pong { payload: Option<Value> },
    /// Closes the WebSocket connection with the given status.
    Close { code: u16, reason: String },
}

impl ServerMessage {
    pub(crate) fn close(code: u16, reason: impl Into<String>) -> Self {
        ServerMessage::Close {
            code,
            reason: truncated(reason.into()),
        }
    }
}

/// A WebSocket frame, as far as the GraphQL protocols are concerned.
///
/// WebSocket-level pings and binary frames are dealt with by the transport adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Deserialize)]
struct RawClientMessage {
    #[serde(rename = "type")]
    message_type: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Serialize)]
struct RawServerMessage<'a> {
    #[serde(rename = "type")]
    message_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<RawPayload<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RawPayload<'a> {
    Response(&'a graphql::Response),
    Error(&'a graphql::Error),
    Errors(&'a [graphql::Error]),
    Value(&'a Value),
}

impl WebSocketProtocol {
    pub fn subprotocol(&self) -> &'static str {
        match self {
            WebSocketProtocol::GraphqlWs => GRAPHQL_WS_SUBPROTOCOL,
            WebSocketProtocol::SubscriptionsTransportWs => SUBSCRIPTIONS_TRANSPORT_WS_SUBPROTOCOL,
        }
    }

    pub fn from_subprotocol(subprotocol: &str) -> Option<Self> {
        match subprotocol {
            GRAPHQL_WS_SUBPROTOCOL => Some(WebSocketProtocol::GraphqlWs),
            SUBSCRIPTIONS_TRANSPORT_WS_SUBPROTOCOL => {
                Some(WebSocketProtocol::SubscriptionsTransportWs)
            }
            _ => None,
        }
    }

    /// Picks the protocol for an upgrade request.
    ///
    /// `enabled` is in preference order. Clients that do not send a `Sec-WebSocket-Protocol`
    /// header get the legacy protocol, if it is enabled.
    pub fn negotiate(
        requested: Option<&HeaderValue>,
        enabled: &[WebSocketProtocol],
    ) -> Option<WebSocketProtocol> {
        let Some(requested) = requested else {
            return enabled
                .contains(&WebSocketProtocol::SubscriptionsTransportWs)
                .then_some(WebSocketProtocol::SubscriptionsTransportWs);
        };
        let offered: Vec<WebSocketProtocol> = requested
            .to_str()
            .ok()?
            .split(',')
            .filter_map(|subprotocol| Self::from_subprotocol(subprotocol.trim()))
            .collect();
        enabled
            .iter()
            .find(|protocol| offered.contains(*protocol))
            .copied()
    }

    /// Whether the server sends `ka` messages while the connection is acknowledged.
    pub(crate) fn sends_keep_alive(&self) -> bool {
        matches!(self, WebSocketProtocol::SubscriptionsTransportWs)
    }

    /// Parses a text frame.
    ///
    /// Each protocol accepts its own set of message types only; anything else is a
    /// [`ProtocolError`] carrying the frame's `id` when one could be read.
    pub fn decode(&self, text: &str) -> Result<ClientMessage, ProtocolError> {
        let raw: RawClientMessage =
            serde_json::from_str(text).map_err(|err| ProtocolError::invalid_message(err, None))?;
        let Some(message_type) = raw.message_type else {
            return Err(ProtocolError::invalid_message(
                "missing message type",
                raw.id,
            ));
        };

        match (self, message_type.as_str()) {
            (_, "connection_init") => Ok(ClientMessage::ConnectionInit {
                payload: raw.payload,
            }),
            (WebSocketProtocol::SubscriptionsTransportWs, "start")
            | (WebSocketProtocol::GraphqlWs, "subscribe") => {
                let id = required_id(raw.id, &message_type)?;
                let Some(payload) = raw.payload else {
                    return Err(ProtocolError::invalid_message(
                        format!("missing payload in '{message_type}' message"),
                        Some(id),
                    ));
                };
                match serde_json_bytes::from_value::<graphql::Request>(payload) {
                    Ok(payload) => Ok(ClientMessage::Start { id, payload }),
                    Err(err) => Err(ProtocolError::invalid_message(err, Some(id))),
                }
            }
            (WebSocketProtocol::SubscriptionsTransportWs, "stop")
            | (WebSocketProtocol::GraphqlWs, "complete") => Ok(ClientMessage::Stop {
                id: required_id(raw.id, &message_type)?,
            }),
            (WebSocketProtocol::SubscriptionsTransportWs, "connection_terminate") => {
                Ok(ClientMessage::ConnectionTerminate)
            }
            (WebSocketProtocol::GraphqlWs, "ping") => Ok(ClientMessage::Ping {
                payload: raw.payload,
            }),
            (WebSocketProtocol::GraphqlWs, "pong") => Ok(ClientMessage::Pong {
                payload: raw.payload,
            }),
            _ => Err(ProtocolError::UnknownMessageType {
                message_type,
                id: raw.id,
            }),
        }
    }

    /// Serializes a server message into a frame.
    ///
    /// Messages that only exist in the other protocol are mapped to their closest
    /// counterpart: a connection error closes a graphql-ws connection, keep-alives become pings
    /// and pings become keep-alives for subscriptions-transport-ws.
    pub fn encode(&self, message: &ServerMessage) -> Result<Frame, serde_json::Error> {
        let legacy = matches!(self, WebSocketProtocol::SubscriptionsTransportWs);
        let raw = match message {
            ServerMessage::ConnectionAck => RawServerMessage {
                message_type: "connection_ack",
                id: None,
                payload: None,
            },
            ServerMessage::ConnectionError { payload } if legacy => RawServerMessage {
                message_type: "connection_error",
                id: None,
                payload: Some(RawPayload::Error(payload)),
            },
            ServerMessage::ConnectionError { payload } => {
                return Ok(Frame::Close {
                    code: 4400,
                    reason: truncated(payload.message.clone()),
                });
            }
            ServerMessage::Data { id, payload } => RawServerMessage {
                message_type: if legacy { "data" } else { "next" },
                id: Some(id),
                payload: Some(RawPayload::Response(payload)),
            },
            ServerMessage::Error { id, payload } => RawServerMessage {
                message_type: "error",
                id: Some(id),
                payload: Some(RawPayload::Errors(payload)),
            },
            ServerMessage::Complete { id } => RawServerMessage {
                message_type: "complete",
                id: Some(id),
                payload: None,
            },
            ServerMessage::KeepAlive | ServerMessage::Ping { .. } | ServerMessage::Pong { .. }
                if legacy =>
            {
                RawServerMessage {
                    message_type: "ka",
                    id: None,
                    payload: None,
                }
            }
            ServerMessage::KeepAlive => RawServerMessage {
                message_type: "ping",
                id: None,
                payload: None,
            },
            ServerMessage::Ping { payload } => RawServerMessage {
                message_type: "ping",
                id: None,
                payload: payload.as_ref().map(RawPayload::Value),
            },
            ServerMessage::Pong { payload } => RawServerMessage {
                message_type: "pong",
                id: None,
                payload: payload.as_ref().map(RawPayload::Value),
            },
            ServerMessage::Close { code, reason } => {
                return Ok(Frame::Close {
                    code: *code,
                    reason: truncated(reason.clone()),
                });
            }
        };
        serde_json::to_string(&raw).map(Frame::Text)
    }

    /// The messages reporting `error` to the client.
    ///
    /// `acknowledged` is whether the connection was acknowledged and `is_active` tells whether an
    /// operation id is currently running. A [`ServerMessage::Close`] among the returned messages
    /// ends the connection.
    pub(crate) fn report(
        &self,
        error: &ProtocolError,
        acknowledged: bool,
        is_active: impl Fn(&str) -> bool,
    ) -> Vec<ServerMessage> {
        match self {
            WebSocketProtocol::SubscriptionsTransportWs => {
                let connection_error = ServerMessage::ConnectionError {
                    payload: error.to_graphql_error(),
                };
                // `error{id}` is terminal for `id` on the client side. It is only sent for ids
                // that are not running, otherwise the running operation would keep emitting
                // frames after its terminal one. Duplicates therefore become `connection_error`.
                match error {
                    ProtocolError::InvalidMessage { .. }
                    | ProtocolError::UnknownMessageType { .. } => match error.operation_id() {
                        Some(id) if acknowledged && !is_active(id) => vec![ServerMessage::Error {
                            id: id.to_string(),
                            payload: vec![error.to_graphql_error()],
                        }],
                        _ => vec![connection_error],
                    },
                    ProtocolError::DuplicateOperationId(_) | ProtocolError::Unacknowledged => {
                        vec![connection_error]
                    }
                    ProtocolError::TooManyInitialisationRequests => Vec::new(),
                    ProtocolError::Forbidden(_) => {
                        vec![connection_error, ServerMessage::close(4403, "Forbidden")]
                    }
                    ProtocolError::InitialisationTimeout => vec![
                        connection_error,
                        ServerMessage::close(4408, "Connection initialisation timeout"),
                    ],
                }
            }
            WebSocketProtocol::GraphqlWs => vec![match error {
                ProtocolError::InvalidMessage { .. } | ProtocolError::UnknownMessageType { .. } => {
                    ServerMessage::close(4400, error.to_string())
                }
                ProtocolError::Unacknowledged => ServerMessage::close(4401, "Unauthorized"),
                ProtocolError::Forbidden(_) => ServerMessage::close(4403, "Forbidden"),
                ProtocolError::InitialisationTimeout => {
                    ServerMessage::close(4408, "Connection initialisation timeout")
                }
                ProtocolError::DuplicateOperationId(id) => {
                    ServerMessage::close(4409, format!("Subscriber for {id} already exists"))
                }
                ProtocolError::TooManyInitialisationRequests => {
                    ServerMessage::close(4429, "Too many initialisation requests")
                }
            }],
        }
    }

    /// The messages reporting an execution failure of operation `id`.
    ///
    /// In graphql-ws `error` is terminal, subscriptions-transport-ws clients also expect a
    /// `complete`.
    pub(crate) fn execution_failed(
        &self,
        id: String,
        errors: Vec<graphql::Error>,
    ) -> Vec<ServerMessage> {
        match self {
            WebSocketProtocol::SubscriptionsTransportWs => vec![
                ServerMessage::Error {
                    id: id.clone(),
                    payload: errors,
                },
                ServerMessage::Complete { id },
            ],
            WebSocketProtocol::GraphqlWs => vec![ServerMessage::Error {
                id,
                payload: errors,
            }],
        }
    }

    /// The message acknowledging that the client stopped operation `id`, if any.
    pub(crate) fn stopped(&self, id: String) -> Option<ServerMessage> {
        match self {
            WebSocketProtocol::SubscriptionsTransportWs => Some(ServerMessage::Complete { id }),
            WebSocketProtocol::GraphqlWs => None,
        }
    }
}

fn required_id(id: Option<String>, message_type: &str) -> Result<String, ProtocolError> {
    id.ok_or_else(|| {
        ProtocolError::invalid_message(format!("missing id in '{message_type}' message"), None)
    })
}

fn truncated(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON_LEN {
        let mut end = MAX_CLOSE_REASON_LEN;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

/// Convert an axum WebSocket into a [`Sink`] of [`Frame`]s and a [`Stream`] of [`Frame`]s.
pub(crate) fn convert_websocket_stream(
    socket: WebSocket,
) -> (
    impl Sink<Frame, Error = axum::Error> + Send + Unpin,
    impl Stream<Item = Result<Frame, axum::Error>> + Send + Unpin,
) {
    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Frame| {
        future::ready(Ok::<_, axum::Error>(match frame {
            Frame::Text(text) => Message::text(text),
            Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
        }))
    });
    let stream = stream.filter_map(|message| {
        future::ready(match message {
            Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
            Ok(Message::Binary(bytes)) => Some(Ok(Frame::Text(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))),
            Ok(Message::Close(frame)) => Some(Ok(match frame {
                Some(CloseFrame { code, reason }) => Frame::Close {
                    code,
                    reason: reason.as_str().to_owned(),
                },
                None => Frame::Close {
                    code: NO_STATUS_RECEIVED,
                    reason: String::new(),
                },
            })),
            // answered by axum
            Ok(Message::Ping(_) | Message::Pong(_)) => None,
            Err(err) => Some(Err(err)),
        })
    });
    (sink, stream)
}
