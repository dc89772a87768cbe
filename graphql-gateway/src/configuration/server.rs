use std::net::SocketAddr;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4000))
}

fn default_path() -> String {
    "/graphql".to_string()
}

/// Configuration for the HTTP server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Server {
    /// The socket address to listen on; defaults to 127.0.0.1:4000
    #[schemars(with = "String", default = "default_listen")]
    pub listen: SocketAddr,

    /// The path serving both HTTP operations and WebSocket upgrades; defaults to /graphql
    #[schemars(default = "default_path")]
    pub path: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

#[buildstructor::buildstructor]
impl Server {
    #[builder(visibility = "pub")]
    fn new(listen: Option<SocketAddr>, path: Option<String>) -> Self {
        Self {
            listen: listen.unwrap_or_else(default_listen),
            path: path.unwrap_or_else(default_path),
        }
    }
}
