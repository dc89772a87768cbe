//! Serves GraphQL operations over HTTP and over the WebSocket subscription protocols, in front of
//! a pluggable GraphQL engine.
#![warn(unreachable_pub)]

pub mod json_ext;
mod axum_factory;
pub mod configuration;
mod context;
mod customizer;
mod data_loader;
mod engine;
pub mod error;
mod execution;
mod gateway;
pub mod graphql;
mod invocation;
pub mod protocols;
pub mod transport;

pub use configuration::Configuration;
pub use configuration::ConfigurationError;
pub use context::Context;
pub use customizer::DefaultCustomizer;
pub use customizer::ExecutionRequestCustomizer;
pub use customizer::HTTP_REQUEST_CONTEXT_KEY;
pub use customizer::HTTP_RESPONSE_CONTEXT_KEY;
pub use data_loader::DataLoaderRegistry;
pub use data_loader::DataLoaderRegistryProvider;
pub use engine::Engine;
pub use engine::EngineFuture;
pub use engine::single_response;
pub use execution::ExecutionRequest;
pub use gateway::Gateway;
pub use gateway::GatewayBuilder;
pub use invocation::Invocation;
pub use invocation::InvocationStream;
pub use protocols::connection::ConnectionInitHandler;
