//! Outbound seam to the host application's chat gateway.
//!
//! The router never owns a gateway connection. Voice state updates are
//! handed to a [`ShardTransport`] the host application supplies, addressed
//! by shard number.

use ember_core::Result;
use serde_json::Value;

/// Sends raw gateway payloads on one of the host application's shards.
pub trait ShardTransport: Send + Sync {
    /// Send `{ "op": op, "d": data }` on `shard`.
    fn send(&self, shard: u64, op: u8, data: Value) -> Result<()>;
}

impl<F> ShardTransport for F
where
    F: Fn(u64, u8, Value) -> Result<()> + Send + Sync,
{
    fn send(&self, shard: u64, op: u8, data: Value) -> Result<()> {
        self(shard, op, data)
    }
}
