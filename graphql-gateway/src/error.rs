//! Gateway errors.
use displaydoc::Display;
use thiserror::Error;

use crate::graphql;
use crate::graphql::IntoGraphQLErrors;

/// Failure of one invocation.
///
/// Whether the engine returned an error while starting, resolved its future to an error or
/// panicked, the caller sees the same variant.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvocationError {
    /// execution failed: {reason}
    ExecutionFailed {
        /// The failure reason reported by the engine.
        reason: String,
    },
}

impl InvocationError {
    pub(crate) fn execution_failed(reason: impl ToString) -> Self {
        InvocationError::ExecutionFailed {
            reason: reason.to_string(),
        }
    }

    pub fn extension_code(&self) -> &'static str {
        match self {
            InvocationError::ExecutionFailed { .. } => "EXECUTION_FAILED",
        }
    }

    /// Convert the invocation error to a GraphQL error.
    pub fn to_graphql_error(&self) -> graphql::Error {
        graphql::Error::builder()
            .message(self.to_string())
            .extension_code(self.extension_code())
            .build()
    }

    /// Convert the invocation error to a GraphQL response with no data.
    pub fn to_response(&self) -> graphql::Response {
        graphql::Response::builder()
            .error(self.to_graphql_error())
            .build()
    }
}

impl IntoGraphQLErrors for InvocationError {
    fn into_graphql_errors(self) -> Vec<graphql::Error> {
        vec![self.to_graphql_error()]
    }
}

/// Violation of a GraphQL over WebSocket protocol by the client.
///
/// Never fatal to the connection loop by itself: each wire protocol decides how it is reported
/// (see [`crate::protocols::websocket::WebSocketProtocol`]).
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    /// invalid message received: {reason}
    InvalidMessage {
        /// Why the frame could not be decoded.
        reason: String,
        /// The operation id, if one could be read from the frame.
        id: Option<String>,
    },

    /// unknown message type '{message_type}'
    UnknownMessageType {
        /// The `type` found in the frame.
        message_type: String,
        /// The operation id, if one could be read from the frame.
        id: Option<String>,
    },

    /// subscriber for {0} already exists
    DuplicateOperationId(String),

    /// connection has not been acknowledged
    Unacknowledged,

    /// too many initialisation requests
    TooManyInitialisationRequests,

    /// connection initialisation rejected: {0}
    Forbidden(String),

    /// connection initialisation timeout
    InitialisationTimeout,
}

impl ProtocolError {
    pub(crate) fn invalid_message(reason: impl ToString, id: Option<String>) -> Self {
        ProtocolError::InvalidMessage {
            reason: reason.to_string(),
            id,
        }
    }

    /// The operation id the offending frame carried, when it could be read.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            ProtocolError::InvalidMessage { id, .. }
            | ProtocolError::UnknownMessageType { id, .. } => id.as_deref(),
            ProtocolError::DuplicateOperationId(id) => Some(id),
            ProtocolError::Unacknowledged
            | ProtocolError::TooManyInitialisationRequests
            | ProtocolError::Forbidden(_)
            | ProtocolError::InitialisationTimeout => None,
        }
    }

    pub fn extension_code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidMessage { .. } => "INVALID_WEBSOCKET_MESSAGE",
            ProtocolError::UnknownMessageType { .. } => "UNKNOWN_WEBSOCKET_MESSAGE_TYPE",
            ProtocolError::DuplicateOperationId(_) => "DUPLICATE_OPERATION_ID",
            ProtocolError::Unacknowledged => "WEBSOCKET_UNACKNOWLEDGED",
            ProtocolError::TooManyInitialisationRequests => "WEBSOCKET_ALREADY_INITIALIZED",
            ProtocolError::Forbidden(_) => "WEBSOCKET_INIT_FORBIDDEN",
            ProtocolError::InitialisationTimeout => "WEBSOCKET_INIT_TIMEOUT",
        }
    }

    /// Convert the protocol error to a GraphQL error.
    pub fn to_graphql_error(&self) -> graphql::Error {
        graphql::Error::builder()
            .message(self.to_string())
            .extension_code(self.extension_code())
            .build()
    }
}

impl IntoGraphQLErrors for ProtocolError {
    fn into_graphql_errors(self) -> Vec<graphql::Error> {
        vec![self.to_graphql_error()]
    }
}
