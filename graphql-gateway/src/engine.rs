//! The seam between the gateway and the GraphQL engine.
//!
//! Parsing, validation and resolvers all live behind [`Engine`]; the gateway only supplies the
//! [`ExecutionRequest`] and forwards what comes back.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream;
use tower::BoxError;

use crate::ExecutionRequest;
use crate::graphql;
use crate::graphql::ResponseStream;

/// Result of a started execution: the responses, or the reason the engine gave up.
pub type EngineFuture = BoxFuture<'static, Result<ResponseStream, BoxError>>;

/// A GraphQL engine with an executable schema.
///
/// Implementations may fail in three ways: returning `Err` from [`Engine::execute`] itself,
/// resolving the returned future to `Err`, or panicking in either place. The
/// [`crate::Invocation`] pipeline reports all of them the same way.
pub trait Engine: Send + Sync + 'static {
    /// Starts executing `request`.
    ///
    /// Queries and mutations yield a single response; subscriptions yield one response per
    /// event and end when their source ends. Dropping the future or the stream cancels the
    /// execution.
    fn execute(&self, request: ExecutionRequest) -> Result<EngineFuture, BoxError>;
}

impl<E> Engine for Arc<E>
where
    E: Engine + ?Sized,
{
    fn execute(&self, request: ExecutionRequest) -> Result<EngineFuture, BoxError> {
        (**self).execute(request)
    }
}

/// Wraps a single response into a [`ResponseStream`].
pub fn single_response(response: graphql::Response) -> ResponseStream {
    stream::once(futures::future::ready(response)).boxed()
}
