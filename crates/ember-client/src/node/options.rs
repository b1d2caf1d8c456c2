//! Connection parameters for one audio node.

use std::time::Duration;

use ember_core::{EmberError, Result, UserId};
use ember_settings::{DEFAULT_RECONNECT_INTERVAL_MS, EmberSettings, NodeSettings};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;

/// Everything needed to open (and re-open) a node socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeOptions {
    /// Unique key for the node within a router.
    pub host: String,
    /// `host:port`, or a full `ws://` / `wss://` URL.
    pub gateway: String,
    /// Sent as the `Authorization` header.
    pub password: String,
    /// Sent as the `User-Id` header.
    pub user_id: UserId,
    /// Sent as the `Num-Shards` header.
    pub num_shards: u64,
    /// Delay before each reconnect attempt.
    pub reconnect_interval: Duration,
}

impl NodeOptions {
    /// Options with one shard and the default reconnect interval.
    pub fn new(
        host: impl Into<String>,
        gateway: impl Into<String>,
        password: impl Into<String>,
        user_id: impl Into<UserId>,
    ) -> Self {
        Self {
            host: host.into(),
            gateway: gateway.into(),
            password: password.into(),
            user_id: user_id.into(),
            num_shards: 1,
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
        }
    }

    /// Set the shard count header.
    #[must_use]
    pub fn with_num_shards(mut self, num_shards: u64) -> Self {
        self.num_shards = num_shards;
        self
    }

    /// Set the reconnect delay.
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Options for a configured node, inheriting client-wide values.
    pub fn from_settings(settings: &EmberSettings, node: &NodeSettings) -> Self {
        Self::new(
            node.host.clone(),
            node.gateway.clone(),
            node.password.clone(),
            settings.user_id.as_str(),
        )
        .with_num_shards(settings.num_shards)
        .with_reconnect_interval(settings.reconnect_interval(node))
    }

    /// WebSocket URL for the gateway.
    pub fn url(&self) -> String {
        if self.gateway.starts_with("ws://") || self.gateway.starts_with("wss://") {
            self.gateway.clone()
        } else {
            format!("ws://{}", self.gateway)
        }
    }

    /// Handshake request carrying the authentication headers.
    pub(crate) fn client_request(&self) -> Result<Request> {
        let mut request = self
            .url()
            .into_client_request()
            .map_err(|e| EmberError::socket(&self.host, e))?;

        let headers = request.headers_mut();
        let _ = headers.insert("Authorization", self.header("Authorization", &self.password)?);
        let _ = headers.insert(
            "Num-Shards",
            self.header("Num-Shards", &self.num_shards.to_string())?,
        );
        let _ = headers.insert("User-Id", self.header("User-Id", self.user_id.as_str())?);
        Ok(request)
    }

    fn header(&self, name: &'static str, value: &str) -> Result<HeaderValue> {
        HeaderValue::from_str(value).map_err(|_| EmberError::InvalidHeader {
            host: self.host.clone(),
            header: name,
        })
    }
}
