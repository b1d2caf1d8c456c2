//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]`. Types marked with
//! `#[serde(default)]` allow partial JSON: missing fields get their default
//! value during deserialization.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 10_000;
/// Shortest accepted reconnect delay.
pub const MIN_RECONNECT_INTERVAL_MS: u64 = 100;
/// Longest accepted reconnect delay.
pub const MAX_RECONNECT_INTERVAL_MS: u64 = 3_600_000;

/// Root settings type for the Ember client.
///
/// ```json
/// {
///   "userId": "1234",
///   "numShards": 2,
///   "nodes": [{ "host": "main", "gateway": "localhost:2333", "password": "youshallnotpass" }]
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmberSettings {
    /// Bot user id sent to every node.
    pub user_id: String,
    /// Total shard count of the host application.
    pub num_shards: u64,
    /// Delay between reconnect attempts, in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,
    /// Audio nodes to register at startup.
    pub nodes: Vec<NodeSettings>,
}

impl Default for EmberSettings {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            num_shards: 1,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            log_level: "info".into(),
            nodes: Vec::new(),
        }
    }
}

/// One configured audio node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSettings {
    /// Unique key for the node.
    pub host: String,
    /// WebSocket gateway, `host:port` or a full `ws://` URL.
    pub gateway: String,
    /// Value of the `Authorization` header.
    #[serde(default)]
    pub password: String,
    /// Per-node reconnect delay overriding the global one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_interval_ms: Option<u64>,
}

impl EmberSettings {
    /// Reconnect delay to use for `node`.
    pub fn reconnect_interval(&self, node: &NodeSettings) -> Duration {
        Duration::from_millis(node.reconnect_interval_ms.unwrap_or(self.reconnect_interval_ms))
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(SettingsError::ZeroShards);
        }
        if !self.nodes.is_empty() && self.user_id.is_empty() {
            return Err(SettingsError::MissingUserId);
        }
        check_reconnect_interval(None, self.reconnect_interval_ms)?;

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.host.is_empty() || node.gateway.is_empty() {
                return Err(SettingsError::InvalidNode {
                    host: node.host.clone(),
                });
            }
            if !seen.insert(node.host.as_str()) {
                return Err(SettingsError::DuplicateNode(node.host.clone()));
            }
            if let Some(interval) = node.reconnect_interval_ms {
                check_reconnect_interval(Some(&node.host), interval)?;
            }
        }
        Ok(())
    }
}

fn check_reconnect_interval(host: Option<&str>, value_ms: u64) -> Result<()> {
    if (MIN_RECONNECT_INTERVAL_MS..=MAX_RECONNECT_INTERVAL_MS).contains(&value_ms) {
        return Ok(());
    }
    Err(SettingsError::ReconnectInterval {
        host: host.map(str::to_owned),
        value_ms,
        min_ms: MIN_RECONNECT_INTERVAL_MS,
        max_ms: MAX_RECONNECT_INTERVAL_MS,
    })
}
