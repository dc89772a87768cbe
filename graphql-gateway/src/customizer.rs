//! Hook applied to every [`ExecutionRequest`] before it reaches the engine.

use futures::StreamExt;
use futures::future::ready;
use futures::stream;
use futures::stream::BoxStream;

use crate::ExecutionRequest;
use crate::transport::TransportRequest;
use crate::transport::TransportResponse;

/// Context key under which [`DefaultCustomizer`] stores the [`TransportRequest`].
pub const HTTP_REQUEST_CONTEXT_KEY: &str = "httpRequest";
/// Context key under which [`DefaultCustomizer`] stores the [`TransportResponse`].
pub const HTTP_RESPONSE_CONTEXT_KEY: &str = "httpResponse";

/// Rewrites, splits or vetoes an execution request.
///
/// Every request the returned stream yields is executed, in order. An empty stream means the
/// operation is not executed at all.
pub trait ExecutionRequestCustomizer: Send + Sync + 'static {
    fn customize(
        &self,
        request: ExecutionRequest,
        transport_request: &TransportRequest,
        transport_response: Option<TransportResponse>,
    ) -> BoxStream<'static, ExecutionRequest>;
}

impl<C> ExecutionRequestCustomizer for std::sync::Arc<C>
where
    C: ExecutionRequestCustomizer + ?Sized,
{
    fn customize(
        &self,
        request: ExecutionRequest,
        transport_request: &TransportRequest,
        transport_response: Option<TransportResponse>,
    ) -> BoxStream<'static, ExecutionRequest> {
        (**self).customize(request, transport_request, transport_response)
    }
}

/// Exposes the transport handles to resolvers and passes the request through once.
///
/// The response handle is only stored when the transport has one: WebSocket operations have no
/// per-operation HTTP response.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCustomizer;

impl ExecutionRequestCustomizer for DefaultCustomizer {
    fn customize(
        &self,
        request: ExecutionRequest,
        transport_request: &TransportRequest,
        transport_response: Option<TransportResponse>,
    ) -> BoxStream<'static, ExecutionRequest> {
        request
            .context
            .insert(HTTP_REQUEST_CONTEXT_KEY, transport_request.clone());
        if let Some(transport_response) = transport_response {
            request
                .context
                .insert(HTTP_RESPONSE_CONTEXT_KEY, transport_response);
        }
        stream::once(ready(request)).boxed()
    }
}
