//! # ember-client
//!
//! Client-side orchestration for remote audio nodes.
//!
//! - **[`node`]**: one persistent WebSocket per node with fixed-interval
//!   reconnects and a statistics snapshot
//! - **[`player`]**: per-guild playback state and node commands
//! - **[`router`]**: owns nodes and sessions, routes node payloads to
//!   sessions, and forwards voice state updates to the host's gateway
//! - **[`transport`]**: the narrow gateway interface the host supplies
//!
//! Node commands issued while a node is not ready are dropped, not queued.

#![deny(unsafe_code)]

pub mod node;
pub mod player;
pub mod router;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use node::{NodeConnection, NodeEnvelope, NodeEvent, NodeHandle, NodeOptions, NodeState};
pub use player::{PlayerEvent, PlayerSession};
pub use router::{JoinRequest, LeaveRequest, Router, RouterEvent, VoiceServerUpdate};
pub use transport::ShardTransport;
