//! # ember-core
//!
//! Foundation types, wire protocol, errors, and logging for the Ember node client.
//!
//! This crate provides the shared vocabulary the other Ember crates depend on:
//!
//! - **Branded IDs**: `GuildId`, `ChannelId`, `UserId` as newtypes for type safety
//! - **Protocol**: outbound `OutboundMessage` commands and inbound `InboundMessage` payloads
//! - **Statistics**: `NodeStats` snapshots and the load penalty derived from them
//! - **Errors**: `EmberError` via `thiserror`
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;
pub mod stats;

pub use errors::{EmberError, Result};
pub use ids::{ChannelId, GuildId, UserId};
