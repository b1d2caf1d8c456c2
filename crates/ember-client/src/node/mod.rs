//! Audio node connections.
//!
//! A [`NodeConnection`] owns one persistent WebSocket to an audio node. A
//! background task opens the socket, reads frames, and reconnects on
//! abnormal closure. Everything the task observes is reported as a
//! [`NodeEvent`] wrapped in a [`NodeEnvelope`] on the channel supplied at
//! construction.

pub mod connection;
mod driver;
pub mod options;

use std::fmt;

use ember_core::EmberError;
use serde_json::Value;

pub use connection::{NodeConnection, NodeHandle};
pub use options::NodeOptions;

/// Close code that ends a node connection for good.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Lifecycle state of a node connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Handshake in progress (or not yet started).
    Connecting,
    /// Socket open; sends are delivered.
    Ready,
    /// Waiting out the reconnect interval.
    Reconnecting,
    /// Closed normally or locally; no further attempts.
    Disconnected,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
        })
    }
}

/// Signal raised by a node connection.
#[derive(Debug)]
pub enum NodeEvent {
    /// The socket opened.
    Ready,
    /// A decoded payload other than `stats`.
    Message(Value),
    /// A frame failed to parse or the socket failed to open.
    Error(EmberError),
    /// The node closed the socket with code 1000.
    Disconnect {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// A reconnect attempt is starting.
    Reconnecting,
}

/// A [`NodeEvent`] tagged with the connection that raised it.
#[derive(Debug)]
pub struct NodeEnvelope {
    /// Host key of the node.
    pub host: String,
    /// Id the connection was created with.
    pub connection_id: u64,
    /// The signal.
    pub event: NodeEvent,
}
