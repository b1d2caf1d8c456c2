//! Node connection state and its send path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use ember_core::EmberError;
use ember_core::stats::NodeStats;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::driver;
use super::{NodeEnvelope, NodeEvent, NodeOptions, NodeState};

/// State shared between a [`NodeConnection`], its driver task, and any
/// [`NodeHandle`]s.
pub(crate) struct NodeShared {
    pub(crate) host: String,
    connection_id: u64,
    state: Mutex<NodeState>,
    /// Write channel of the live socket; `None` while not ready.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    stats: Mutex<NodeStats>,
    signals: mpsc::UnboundedSender<NodeEnvelope>,
    dropped_frames: AtomicU64,
    /// Cancelled by [`close`](Self::close) while holding the state lock.
    cancel: CancellationToken,
}

// Lock order: `state`, then `outbound`.
impl NodeShared {
    /// Raise a signal unless the connection has been closed.
    pub(crate) fn emit(&self, event: NodeEvent) {
        let _state = self.state.lock();
        if self.cancel.is_cancelled() {
            trace!(host = %self.host, "connection closed, suppressing signal");
            return;
        }
        let _ = self.signals.send(NodeEnvelope {
            host: self.host.clone(),
            connection_id: self.connection_id,
            event,
        });
    }

    pub(crate) fn state(&self) -> NodeState {
        *self.state.lock()
    }

    /// Move to `next`. Returns `false`, leaving the state alone, once closed.
    pub(crate) fn set_state(&self, next: NodeState) -> bool {
        let mut state = self.state.lock();
        if self.cancel.is_cancelled() {
            return false;
        }
        *state = next;
        true
    }

    /// Install the write channel of a freshly opened socket.
    ///
    /// Returns `false` without installing anything once closed.
    pub(crate) fn attach(&self, tx: mpsc::UnboundedSender<Message>) -> bool {
        let mut state = self.state.lock();
        if self.cancel.is_cancelled() {
            return false;
        }
        *self.outbound.lock() = Some(tx);
        *state = NodeState::Ready;
        true
    }

    /// Drop the write channel and move to `next`, or to `Disconnected`
    /// once closed.
    pub(crate) fn detach(&self, next: NodeState) {
        let mut state = self.state.lock();
        *self.outbound.lock() = None;
        *state = if self.cancel.is_cancelled() {
            NodeState::Disconnected
        } else {
            next
        };
    }

    /// Cancel the driver and detach. Nothing is signalled afterwards.
    fn close(&self) {
        let mut state = self.state.lock();
        self.cancel.cancel();
        *self.outbound.lock() = None;
        *state = NodeState::Disconnected;
    }

    pub(crate) fn replace_stats(&self, stats: NodeStats) {
        *self.stats.lock() = stats;
    }

    fn send<T: Serialize + ?Sized>(&self, message: &T) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.send_text(json),
            Err(err) => {
                warn!(host = %self.host, error = %err, "failed to serialize node payload");
                self.emit(NodeEvent::Error(EmberError::Serialize(err)));
                false
            }
        }
    }

    fn send_text(&self, json: String) -> bool {
        let sent = self
            .outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(Message::Text(json.into())).is_ok());
        if sent {
            trace!(host = %self.host, "queued node frame");
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            debug!(host = %self.host, "node not ready, dropping frame");
        }
        sent
    }
}

/// One persistent WebSocket connection to an audio node.
///
/// Created idle; [`open`](Self::open) spawns the task that connects and
/// keeps reconnecting until the node closes normally or the connection is
/// closed locally. Dropping the connection closes it.
pub struct NodeConnection {
    id: u64,
    options: NodeOptions,
    shared: Arc<NodeShared>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl NodeConnection {
    /// Create a connection whose signals are sent on `signals`.
    ///
    /// `id` is copied into every [`NodeEnvelope`] so a receiver can tell
    /// two registrations of the same host apart.
    pub fn new(id: u64, options: NodeOptions, signals: mpsc::UnboundedSender<NodeEnvelope>) -> Self {
        let cancel = CancellationToken::new();
        let shared = Arc::new(NodeShared {
            host: options.host.clone(),
            connection_id: id,
            state: Mutex::new(NodeState::Connecting),
            outbound: Mutex::new(None),
            stats: Mutex::new(NodeStats::default()),
            signals,
            dropped_frames: AtomicU64::new(0),
            cancel: cancel.clone(),
        });
        Self {
            id,
            options,
            shared,
            cancel,
            task: None,
        }
    }

    /// Start connecting. Must be called within a Tokio runtime.
    ///
    /// No-op if already opened or closed.
    pub fn open(&mut self) {
        if self.task.is_some() || self.cancel.is_cancelled() {
            return;
        }
        self.task = Some(tokio::spawn(driver::run_connection(
            self.shared.clone(),
            self.options.clone(),
            self.cancel.clone(),
        )));
    }

    /// Serialize `message` and write it to the socket.
    ///
    /// Returns `false` when the connection is not ready (the frame is
    /// dropped) or serialization fails (an error signal is raised).
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> bool {
        self.shared.send(message)
    }

    /// Stop the connection and any pending reconnect. Raises no signal.
    pub fn close(&mut self) {
        self.shared.close();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Id given at construction.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Host key.
    pub fn host(&self) -> &str {
        &self.options.host
    }

    /// Connection parameters.
    pub fn options(&self) -> &NodeOptions {
        &self.options
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        self.shared.state()
    }

    /// Whether sends are currently delivered.
    pub fn is_ready(&self) -> bool {
        self.state() == NodeState::Ready
    }

    /// Latest statistics snapshot.
    pub fn stats(&self) -> NodeStats {
        self.shared.stats.lock().clone()
    }

    /// Load penalty of the latest snapshot.
    pub fn penalty(&self) -> f64 {
        self.shared.stats.lock().penalty()
    }

    /// Frames dropped because the connection was not ready.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped_frames.load(Ordering::Relaxed)
    }

    /// Non-owning handle for sending through this connection.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            host: self.options.host.clone(),
            inner: Arc::downgrade(&self.shared),
        }
    }

    #[cfg(test)]
    pub(crate) fn attach_for_test(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.shared.attach(tx);
        rx
    }

    #[cfg(test)]
    pub(crate) fn shared_for_test(&self) -> Arc<NodeShared> {
        self.shared.clone()
    }
}

impl Drop for NodeConnection {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl std::fmt::Debug for NodeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConnection")
            .field("id", &self.id)
            .field("host", &self.options.host)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Non-owning reference to a [`NodeConnection`].
///
/// Sends through a handle whose connection has been dropped are discarded.
#[derive(Clone, Debug)]
pub struct NodeHandle {
    host: String,
    inner: Weak<NodeShared>,
}

impl NodeHandle {
    /// Host key of the node.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether the connection still exists.
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Whether the connection exists and is ready.
    pub fn is_ready(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|shared| shared.state() == NodeState::Ready)
    }

    /// Same as [`NodeConnection::send`].
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> bool {
        match self.inner.upgrade() {
            Some(shared) => shared.send(message),
            None => {
                debug!(host = %self.host, "node connection gone, dropping frame");
                false
            }
        }
    }
}
