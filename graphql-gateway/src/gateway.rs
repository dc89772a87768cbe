//! Wires an engine, its hooks and the configuration into a servable gateway.

use std::str::FromStr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower::BoxError;

use crate::Invocation;
use crate::axum_factory::GatewayState;
use crate::axum_factory::main_router;
use crate::configuration::Configuration;
use crate::customizer::ExecutionRequestCustomizer;
use crate::data_loader::DataLoaderRegistryProvider;
use crate::engine::Engine;
use crate::protocols::connection::ConnectionHandler;
use crate::protocols::connection::ConnectionInitHandler;

/// Builder for a [`Gateway`].
///
/// ```ignore
/// let gateway = Gateway::builder()
///     .engine(MyEngine::new(schema))
///     .configuration_yaml("server:\n  listen: 0.0.0.0:4000\n")?
///     .connection_init_handler(CheckToken)
///     .build()?;
/// gateway.serve(TcpListener::bind(gateway.listen_address()).await?).await?;
/// ```
#[derive(Default)]
pub struct GatewayBuilder {
    engine: Option<Arc<dyn Engine>>,
    configuration: Option<Configuration>,
    customizer: Option<Arc<dyn ExecutionRequestCustomizer>>,
    data_loader_registry: Option<Arc<dyn DataLoaderRegistryProvider>>,
    connection_init_handler: Option<Arc<dyn ConnectionInitHandler>>,
}

impl GatewayBuilder {
    /// The engine every operation runs on. Required.
    pub fn engine(mut self, engine: impl Engine) -> Self {
        self.engine = Some(Arc::new(engine));
        self
    }

    /// Defaults to [`Configuration::default`].
    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// Same as [`configuration`][Self::configuration], parsed from YAML.
    pub fn configuration_yaml(self, yaml: &str) -> Result<Self, BoxError> {
        Ok(self.configuration(Configuration::from_str(yaml)?))
    }

    /// Replaces [`crate::DefaultCustomizer`].
    pub fn customizer(mut self, customizer: impl ExecutionRequestCustomizer) -> Self {
        self.customizer = Some(Arc::new(customizer));
        self
    }

    /// Gives each execution a fresh registry from `provider`.
    pub fn data_loader_registry(mut self, provider: impl DataLoaderRegistryProvider) -> Self {
        self.data_loader_registry = Some(Arc::new(provider));
        self
    }

    /// Decides whether WebSocket connections are acknowledged. Accepts all of them otherwise.
    pub fn connection_init_handler(mut self, handler: impl ConnectionInitHandler) -> Self {
        self.connection_init_handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Gateway, BoxError> {
        let engine = self.engine.ok_or("a gateway requires an engine")?;
        let configuration = self.configuration.unwrap_or_default();
        configuration.validate()?;

        let mut invocation = Invocation::new(engine);
        if let Some(customizer) = self.customizer {
            invocation = invocation.with_customizer(customizer);
        }
        if let Some(provider) = self.data_loader_registry {
            invocation = invocation.with_data_loader_registry(move || provider.get());
        }

        let mut connection_handler =
            ConnectionHandler::new(invocation.clone(), &configuration.subscription);
        if let Some(handler) = self.connection_init_handler {
            connection_handler = connection_handler.with_init_handler(handler);
        }

        let state = GatewayState::new(invocation, connection_handler, &configuration);
        Ok(Gateway {
            configuration: Arc::new(configuration),
            state,
        })
    }
}

/// GraphQL over HTTP and WebSocket in front of an [`Engine`].
#[derive(Clone, Debug)]
pub struct Gateway {
    configuration: Arc<Configuration>,
    state: GatewayState,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// The address configured in `server.listen`.
    pub fn listen_address(&self) -> std::net::SocketAddr {
        self.configuration.server.listen
    }

    /// The axum router, to be served or nested in a larger application.
    pub fn router(&self) -> Router {
        main_router(&self.configuration, self.state.clone())
    }

    /// Serves on `listener` until the returned future is dropped or the listener fails.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        let address = listener.local_addr()?;
        tracing::info!(
            %address,
            path = %self.configuration.server.path,
            "GraphQL gateway listening"
        );
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;

    use super::*;
    use crate::ExecutionRequest;
    use crate::engine::EngineFuture;

    struct NoopEngine;

    impl Engine for NoopEngine {
        fn execute(&self, _request: ExecutionRequest) -> Result<EngineFuture, BoxError> {
            Err("unused".into())
        }
    }

    #[test]
    fn an_engine_is_required() {
        let error = Gateway::builder().build().unwrap_err();
        assert_eq!(error.to_string(), "a gateway requires an engine");
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        assert!(
            Gateway::builder()
                .engine(NoopEngine)
                .configuration_yaml("server:\n  path: graphql\n")
                .is_err()
        );

        let mut configuration = Configuration::default();
        configuration.subscription.queue_capacity = 0;
        assert!(
            Gateway::builder()
                .engine(NoopEngine)
                .configuration(configuration)
                .build()
                .is_err()
        );
    }

    #[test]
    fn disabled_subscriptions_have_no_connection_handler() {
        let gateway = Gateway::builder()
            .engine(NoopEngine)
            .configuration_yaml("subscription:\n  enabled: false\n")
            .unwrap()
            .build()
            .unwrap();
        assert!(gateway.state.connection_handler.is_none());
        assert!(!gateway.configuration().subscription.enabled);
    }

    static_assertions::assert_impl_all!(Gateway: Send, Sync);
    #[allow(dead_code)]
    fn assert_serve_is_send(gateway: &Gateway, listener: TcpListener) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = gateway.serve(listener).await;
        })
    }
}
