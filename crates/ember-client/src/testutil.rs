//! Shared fixtures for unit tests.

use ember_core::Result;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::node::{NodeConnection, NodeEnvelope, NodeOptions};
use crate::transport::ShardTransport;

pub(crate) fn options(host: &str) -> NodeOptions {
    NodeOptions::new(host, "127.0.0.1:1", "pw", "42")
}

/// A connection attached to an in-memory socket, never opened.
pub(crate) fn ready_node(
    host: &str,
) -> (
    NodeConnection,
    mpsc::UnboundedReceiver<Message>,
    mpsc::UnboundedReceiver<NodeEnvelope>,
) {
    let (tx, signals) = mpsc::unbounded_channel();
    let node = NodeConnection::new(1, options(host), tx);
    let outbound = node.attach_for_test();
    (node, outbound, signals)
}

/// Drain queued frames as JSON.
pub(crate) fn frames(outbound: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(message) = outbound.try_recv() {
        match message {
            Message::Text(text) => out.push(serde_json::from_str(text.as_str()).unwrap()),
            other => panic!("unexpected frame {other:?}"),
        }
    }
    out
}

/// Gateway transport that records every payload.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<(u64, u8, Value)>>,
}

impl RecordingTransport {
    pub(crate) fn sent(&self) -> Vec<(u64, u8, Value)> {
        self.sent.lock().clone()
    }
}

impl ShardTransport for RecordingTransport {
    fn send(&self, shard: u64, op: u8, data: Value) -> Result<()> {
        self.sent.lock().push((shard, op, data));
        Ok(())
    }
}
