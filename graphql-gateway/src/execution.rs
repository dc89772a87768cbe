//! The request handed to the engine.

use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;
use static_assertions::assert_impl_all;

use crate::Context;
use crate::data_loader::DataLoaderRegistry;
use crate::graphql;
use crate::json_ext::Object;

assert_impl_all!(ExecutionRequest: Send, Sync);
/// One operation, ready to be executed.
///
/// Built once per invocation by the [`crate::Invocation`] pipeline, then passed through the
/// [`crate::ExecutionRequestCustomizer`] before reaching the [`crate::Engine`].
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct ExecutionRequest {
    /// The GraphQL document.
    pub query: Option<String>,

    /// The operation to run when the document has several.
    pub operation_name: Option<String>,

    /// Variable values, never wrapped or re-encoded.
    pub variables: Object,

    /// Request extensions, as sent by the client.
    pub extensions: Object,

    /// Loaders scoped to this execution only.
    pub data_loader_registry: Option<DataLoaderRegistry>,

    /// Entries visible to resolvers during this execution only.
    pub context: Context,
}

#[buildstructor::buildstructor]
impl ExecutionRequest {
    #[builder(visibility = "pub")]
    fn new(
        query: Option<String>,
        operation_name: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        variables: JsonMap<ByteString, Value>,
        extensions: JsonMap<ByteString, Value>,
        data_loader_registry: Option<DataLoaderRegistry>,
        context: Option<Context>,
    ) -> Self {
        Self {
            query,
            operation_name,
            variables,
            extensions,
            data_loader_registry,
            context: context.unwrap_or_default(),
        }
    }
}

impl From<graphql::Request> for ExecutionRequest {
    fn from(request: graphql::Request) -> Self {
        ExecutionRequest::builder()
            .and_query(request.query)
            .and_operation_name(request.operation_name)
            .variables(request.variables)
            .extensions(request.extensions)
            .build()
    }
}
