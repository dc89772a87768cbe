//! Turns a GraphQL request plus its transport handles into engine executions.

use std::any::Any;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::StreamExt;
use futures::stream;
use futures::stream::BoxStream;

use crate::ExecutionRequest;
use crate::customizer::DefaultCustomizer;
use crate::customizer::ExecutionRequestCustomizer;
use crate::data_loader::DataLoaderRegistryProvider;
use crate::engine::Engine;
use crate::error::InvocationError;
use crate::graphql;
use crate::transport::TransportRequest;
use crate::transport::TransportResponse;

/// Results of one invocation, in customizer order.
///
/// An execution that fails yields a single `Err` and no further item for that execution.
pub type InvocationStream = BoxStream<'static, Result<graphql::Response, InvocationError>>;

/// The invocation pipeline.
///
/// Cheap to clone: the HTTP handlers and every WebSocket connection share one instance.
#[derive(Clone)]
pub struct Invocation {
    engine: Arc<dyn Engine>,
    customizer: Arc<dyn ExecutionRequestCustomizer>,
    data_loader_registry: Option<Arc<dyn DataLoaderRegistryProvider>>,
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field(
                "data_loader_registry",
                &self.data_loader_registry.is_some(),
            )
            .finish_non_exhaustive()
    }
}

impl Invocation {
    /// Creates a pipeline running [`DefaultCustomizer`] and no data-loader registry.
    pub fn new(engine: impl Engine) -> Self {
        Self {
            engine: Arc::new(engine),
            customizer: Arc::new(DefaultCustomizer),
            data_loader_registry: None,
        }
    }

    pub fn with_customizer(mut self, customizer: impl ExecutionRequestCustomizer) -> Self {
        self.customizer = Arc::new(customizer);
        self
    }

    /// Attaches a fresh registry from `provider` to every invocation.
    pub fn with_data_loader_registry(
        mut self,
        provider: impl DataLoaderRegistryProvider,
    ) -> Self {
        self.data_loader_registry = Some(Arc::new(provider));
        self
    }

    /// Invokes the engine for `request`.
    ///
    /// Nothing happens until the returned stream is polled. Engine faults never escape as
    /// panics: they come out of the stream as [`InvocationError::ExecutionFailed`].
    pub fn invoke(
        &self,
        request: graphql::Request,
        transport_request: TransportRequest,
        transport_response: Option<TransportResponse>,
    ) -> InvocationStream {
        let engine = self.engine.clone();
        let customizer = self.customizer.clone();
        let data_loader_registry = self.data_loader_registry.clone();

        stream::once(async move {
            let mut execution_request = ExecutionRequest::from(request);
            execution_request.data_loader_registry =
                data_loader_registry.map(|provider| provider.get());

            customizer
                .customize(execution_request, &transport_request, transport_response)
                .map(move |request| execute(engine.as_ref(), request))
                .flatten()
        })
        .flatten()
        .boxed()
    }
}

fn execute(engine: &dyn Engine, request: ExecutionRequest) -> InvocationStream {
    let started = panic::catch_unwind(AssertUnwindSafe(|| engine.execute(request)));
    let future = match started {
        Ok(Ok(future)) => future,
        Ok(Err(error)) => return failure(InvocationError::execution_failed(error)),
        Err(payload) => return failure(panicked(payload)),
    };

    AssertUnwindSafe(future)
        .catch_unwind()
        .map(|outcome| match outcome {
            Ok(Ok(responses)) => AssertUnwindSafe(responses)
                .catch_unwind()
                .map(|response| response.map_err(panicked))
                .boxed(),
            Ok(Err(error)) => failure(InvocationError::execution_failed(error)),
            Err(payload) => failure(panicked(payload)),
        })
        .flatten_stream()
        .boxed()
}

fn failure(error: InvocationError) -> InvocationStream {
    tracing::debug!(%error, "execution failed");
    stream::once(futures::future::ready(Err(error))).boxed()
}

fn panicked(payload: Box<dyn Any + Send>) -> InvocationError {
    let reason = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!(%reason, "engine panicked");
    InvocationError::execution_failed(format!("engine panicked: {reason}"))
}
