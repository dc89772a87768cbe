//! Logic for loading configuration in to an object model
mod server;
mod subscription;

use std::str::FromStr;

use displaydoc::Display;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub use self::server::Server;
pub use self::subscription::SubscriptionConfig;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not parse configuration: {0}
    InvalidYaml(#[from] serde_yaml::Error),
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
}

/// The configuration of the gateway.
///
/// Can be created through `serde::Deserialize` from various formats, with [`FromStr`] from YAML,
/// or inline in Rust code with the builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Configuration options pertaining to the http server component.
    pub server: Server,

    /// GraphQL subscriptions over WebSocket.
    pub subscription: SubscriptionConfig,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder(visibility = "pub")]
    fn new(
        server: Option<Server>,
        subscription: Option<SubscriptionConfig>,
    ) -> Result<Self, ConfigurationError> {
        let configuration = Self {
            server: server.unwrap_or_default(),
            subscription: subscription.unwrap_or_default(),
        };
        configuration.validate()?;
        Ok(configuration)
    }

    /// Checks the values serde cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.server.path.starts_with('/') {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid server path",
                error: format!("'{}' must start with '/'", self.server.path),
            });
        }
        if self.subscription.queue_capacity == 0 {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid subscription queue capacity",
                error: "must be greater than 0".to_string(),
            });
        }
        if self.subscription.enabled && self.subscription.protocols.is_empty() {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid subscription protocols",
                error: "at least one protocol is required when subscriptions are enabled"
                    .to_string(),
            });
        }
        if self.subscription.keep_alive_interval == Some(std::time::Duration::ZERO) {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid keep alive interval",
                error: "must be greater than 0, use null to disable keep alive".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse configuration from a string in YAML syntax
impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Configuration::default());
        }
        let configuration: Configuration = serde_yaml::from_str(s)?;
        configuration.validate()?;
        Ok(configuration)
    }
}

/// Generate a JSON schema for the configuration.
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });

    settings
        .into_generator()
        .into_root_schema_for::<Configuration>()
}
