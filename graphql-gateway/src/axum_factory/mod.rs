//! The axum router serving GraphQL over HTTP and WebSocket.
mod handlers;
#[cfg(test)]
mod tests;

use axum::Router;
use axum::extract::Extension;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use self::handlers::handle_get;
use self::handlers::handle_post;
use crate::Invocation;
use crate::configuration::Configuration;
use crate::protocols::connection::ConnectionHandler;
use crate::protocols::websocket::WebSocketProtocol;

/// What the handlers share, cloned into every request.
#[derive(Clone, Debug)]
pub(crate) struct GatewayState {
    pub(crate) invocation: Invocation,
    /// `None` when subscriptions are disabled.
    pub(crate) connection_handler: Option<ConnectionHandler>,
    pub(crate) protocols: Vec<WebSocketProtocol>,
}

impl GatewayState {
    pub(crate) fn new(
        invocation: Invocation,
        connection_handler: ConnectionHandler,
        configuration: &Configuration,
    ) -> Self {
        let subscription = &configuration.subscription;
        Self {
            invocation,
            connection_handler: subscription.enabled.then_some(connection_handler),
            protocols: subscription.protocols.clone(),
        }
    }
}

pub(crate) fn main_router(configuration: &Configuration, state: GatewayState) -> Router {
    Router::new()
        .route(
            &configuration.server.path,
            get(handle_get).post(handle_post),
        )
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}
