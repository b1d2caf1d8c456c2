//! Error hierarchy for the Ember node client.
//!
//! Failures on a live node connection (bad frames, socket trouble) are
//! reported asynchronously as signals carrying an [`EmberError`]. Mistakes
//! the caller makes while configuring the client (registering a host twice,
//! joining through an unknown node) come back synchronously as `Err`.

use thiserror::Error;

/// Top-level error type for the Ember node client.
#[derive(Debug, Error)]
pub enum EmberError {
    /// An inbound frame was not valid JSON or did not match the protocol.
    #[error("failed to parse node frame: {0}")]
    Parse(#[source] serde_json::Error),

    /// An outbound payload could not be serialized.
    #[error("failed to serialize outbound payload: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Socket-level failure talking to a node.
    #[error("socket error on node {host}: {message}")]
    Socket {
        /// Node host key.
        host: String,
        /// Underlying error description.
        message: String,
    },

    /// A connection header could not be built from the configured value.
    #[error("invalid {header} header for node {host}")]
    InvalidHeader {
        /// Node host key.
        host: String,
        /// Header name.
        header: &'static str,
    },

    /// A node is already registered under this host.
    #[error("node {0} is already registered")]
    NodeAlreadyRegistered(String),

    /// No node is registered under this host.
    #[error("no node registered for host {0}")]
    UnknownNode(String),

    /// The host application's gateway transport refused a payload.
    #[error("transport send failed on shard {shard}: {message}")]
    Transport {
        /// Shard the payload was addressed to.
        shard: u64,
        /// Underlying error description.
        message: String,
    },
}

impl EmberError {
    /// Build a socket error from any displayable cause.
    pub fn socket(host: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Socket {
            host: host.into(),
            message: cause.to_string(),
        }
    }

    /// Build a transport error from any displayable cause.
    pub fn transport(shard: u64, cause: impl std::fmt::Display) -> Self {
        Self::Transport {
            shard,
            message: cause.to_string(),
        }
    }

    /// Whether the failure only affects the current frame or connection
    /// attempt, leaving the client in a usable state.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Serialize(_) | Self::Socket { .. })
    }
}

/// Result type for Ember operations.
pub type Result<T> = std::result::Result<T, EmberError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
