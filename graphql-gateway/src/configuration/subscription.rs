use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::protocols::websocket::WebSocketProtocol;

const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_QUEUE_CAPACITY: usize = 128;

fn default_enabled() -> bool {
    true
}

fn default_protocols() -> Vec<WebSocketProtocol> {
    vec![
        WebSocketProtocol::GraphqlWs,
        WebSocketProtocol::SubscriptionsTransportWs,
    ]
}

fn default_keep_alive_interval() -> Option<Duration> {
    Some(DEFAULT_KEEP_ALIVE_INTERVAL)
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Subscriptions over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct SubscriptionConfig {
    /// Accept WebSocket upgrades (default: true)
    pub enabled: bool,

    /// Accepted WebSocket protocols, in order of preference (default: both, graphql_ws first)
    pub protocols: Vec<WebSocketProtocol>,

    /// Interval of the `ka` messages of the subscriptions_transport_ws protocol, in
    /// human-readable format; defaults to 15s, null disables them
    #[serde(with = "humantime_serde")]
    #[schemars(with = "Option<String>", default = "default_keep_alive_interval")]
    pub keep_alive_interval: Option<Duration>,

    /// Close connections that are not initialised within this delay, in human-readable format.
    /// By default there is no limit.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "Option<String>")]
    pub connection_init_timeout: Option<Duration>,

    /// Capacity of the per-connection queue of operation events (default: 128)
    pub queue_capacity: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            protocols: default_protocols(),
            keep_alive_interval: default_keep_alive_interval(),
            connection_init_timeout: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[buildstructor::buildstructor]
impl SubscriptionConfig {
    /// Keep-alive messages and the init timeout are off unless set.
    #[builder(visibility = "pub")]
    fn new(
        enabled: Option<bool>,
        protocols: Option<Vec<WebSocketProtocol>>,
        keep_alive_interval: Option<Duration>,
        connection_init_timeout: Option<Duration>,
        queue_capacity: Option<usize>,
    ) -> Self {
        Self {
            enabled: enabled.unwrap_or_else(default_enabled),
            protocols: protocols.unwrap_or_else(default_protocols),
            keep_alive_interval,
            connection_init_timeout,
            queue_capacity: queue_capacity.unwrap_or_else(default_queue_capacity),
        }
    }
}
