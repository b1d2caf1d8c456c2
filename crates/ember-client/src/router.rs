//! Router: owns node connections and player sessions.
//!
//! The router is driven from a single task. Every operation takes
//! `&mut self`, so the node and session maps need no locking; node tasks
//! talk to the router only through the signal channel drained by
//! [`Router::next_event`].
//!
//! ```text
//! host ──join/leave──▶ Router ──op 4──▶ ShardTransport
//!                        │
//!        voice_server_update / session_mut
//!                        ▼
//!                  PlayerSession ──send──▶ NodeConnection ──▶ node
//!                        ▲                        │
//!                        └──── demultiplex ◀──────┘ (via next_event)
//! ```

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use ember_core::protocol::{
    InboundMessage, TrackEventKind, VOICE_STATE_UPDATE_OP, VoiceStateUpdate, message_op,
};
use ember_core::{ChannelId, EmberError, GuildId, Result};
use ember_settings::EmberSettings;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::node::{NodeConnection, NodeEnvelope, NodeEvent, NodeOptions};
use crate::player::PlayerSession;
use crate::transport::ShardTransport;

/// Node lifecycle notification surfaced to the host application.
#[derive(Debug)]
pub enum RouterEvent {
    /// A node socket opened.
    NodeReady {
        /// Node host key.
        host: String,
    },
    /// A node closed its socket normally and will not be retried.
    NodeDisconnected {
        /// Node host key.
        host: String,
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// A node reconnect attempt is starting.
    NodeReconnecting {
        /// Node host key.
        host: String,
    },
    /// A node reported a frame or connection error.
    NodeError {
        /// Node host key.
        host: String,
        /// The failure.
        error: EmberError,
    },
}

/// Parameters for [`Router::join`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinRequest {
    /// Shard that owns the guild.
    pub shard: u64,
    /// Node the new session should use.
    pub host: String,
    /// Guild to join in.
    pub guild_id: GuildId,
    /// Voice channel to join.
    pub channel_id: ChannelId,
    /// Join muted.
    pub self_mute: bool,
    /// Join deafened.
    pub self_deaf: bool,
}

impl JoinRequest {
    /// Unmuted, undeafened join.
    pub fn new(
        shard: u64,
        host: impl Into<String>,
        guild_id: impl Into<GuildId>,
        channel_id: impl Into<ChannelId>,
    ) -> Self {
        Self {
            shard,
            host: host.into(),
            guild_id: guild_id.into(),
            channel_id: channel_id.into(),
            self_mute: false,
            self_deaf: false,
        }
    }
}

/// Parameters for [`Router::leave`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaveRequest {
    /// Shard that owns the guild.
    pub shard: u64,
    /// Guild to leave.
    pub guild_id: GuildId,
}

/// Voice server credentials relayed from the chat gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct VoiceServerUpdate {
    /// Guild the credentials belong to.
    pub guild_id: GuildId,
    /// Voice session id of the bot user.
    pub session_id: String,
    /// Raw `VOICE_SERVER_UPDATE` event.
    pub event: Value,
}

/// Owns node connections by host and player sessions by guild.
pub struct Router {
    transport: Arc<dyn ShardTransport>,
    nodes: HashMap<String, NodeConnection>,
    sessions: HashMap<GuildId, PlayerSession>,
    signals_tx: mpsc::UnboundedSender<NodeEnvelope>,
    signals_rx: mpsc::UnboundedReceiver<NodeEnvelope>,
    next_connection_id: u64,
}

impl Router {
    /// Create an empty router forwarding gateway payloads to `transport`.
    pub fn new(transport: Arc<dyn ShardTransport>) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            nodes: HashMap::new(),
            sessions: HashMap::new(),
            signals_tx,
            signals_rx,
            next_connection_id: 0,
        }
    }

    // ── Nodes ───────────────────────────────────────────────────────────────

    /// Open a connection to a node and store it under its host.
    ///
    /// Must be called within a Tokio runtime. Fails if the host is already
    /// registered or the connection headers cannot be built.
    pub fn register_node(&mut self, options: NodeOptions) -> Result<&NodeConnection> {
        if self.nodes.contains_key(&options.host) {
            return Err(EmberError::NodeAlreadyRegistered(options.host));
        }
        let _ = options.client_request()?;

        let mut node = self.new_connection(options);
        node.open();
        info!(host = node.host(), id = node.id(), "node registered");
        self.insert_node(node)
    }

    /// Register every node in `settings`. Returns how many were registered.
    pub fn register_configured_nodes(&mut self, settings: &EmberSettings) -> Result<usize> {
        for node in &settings.nodes {
            let _ = self.register_node(NodeOptions::from_settings(settings, node))?;
        }
        Ok(settings.nodes.len())
    }

    /// Close and forget a node. Returns `false` if the host is unknown.
    ///
    /// Signals the node raised before removal are discarded, and a pending
    /// reconnect is cancelled. Sessions bound to the node stay, but their
    /// commands are dropped.
    pub fn remove_node(&mut self, host: &str) -> bool {
        match self.nodes.remove(host) {
            Some(mut node) => {
                node.close();
                info!(host, "node removed");
                true
            }
            None => false,
        }
    }

    /// Node registered under `host`.
    pub fn node(&self, host: &str) -> Option<&NodeConnection> {
        self.nodes.get(host)
    }

    /// All registered nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeConnection> {
        self.nodes.values()
    }

    /// Ready node with the lowest load penalty.
    pub fn ideal_node(&self) -> Option<&NodeConnection> {
        self.nodes
            .values()
            .filter(|node| node.is_ready())
            .min_by(|a, b| a.penalty().total_cmp(&b.penalty()))
    }

    fn new_connection(&mut self, options: NodeOptions) -> NodeConnection {
        self.next_connection_id += 1;
        NodeConnection::new(self.next_connection_id, options, self.signals_tx.clone())
    }

    pub(crate) fn insert_node(&mut self, node: NodeConnection) -> Result<&NodeConnection> {
        match self.nodes.entry(node.host().to_owned()) {
            Entry::Occupied(entry) => Err(EmberError::NodeAlreadyRegistered(entry.key().clone())),
            Entry::Vacant(entry) => Ok(entry.insert(node)),
        }
    }

    // ── Sessions ────────────────────────────────────────────────────────────

    /// Ask the gateway to join a voice channel and get the guild's session.
    ///
    /// The voice state update is forwarded on every call. A session is
    /// created on the first call for a guild and returned unchanged after
    /// that, even if `host` differs.
    pub fn join(&mut self, request: JoinRequest) -> Result<&mut PlayerSession> {
        if !self.sessions.contains_key(&request.guild_id) && !self.nodes.contains_key(&request.host) {
            return Err(EmberError::UnknownNode(request.host));
        }

        let payload = VoiceStateUpdate::join(
            request.guild_id.clone(),
            request.channel_id.clone(),
            request.self_mute,
            request.self_deaf,
        );
        self.forward(request.shard, &payload)?;

        match self.sessions.entry(request.guild_id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let node = self
                    .nodes
                    .get(&request.host)
                    .ok_or_else(|| EmberError::UnknownNode(request.host.clone()))?;
                let guild_id = entry.key().clone();
                info!(%guild_id, channel_id = %request.channel_id, host = %request.host, "player session created");
                Ok(entry.insert(PlayerSession::new(guild_id, request.channel_id, node.handle())))
            }
        }
    }

    /// Ask the gateway to leave voice and drop the guild's session.
    ///
    /// The leave payload is forwarded even when no session exists.
    pub fn leave(&mut self, request: LeaveRequest) -> Result<()> {
        self.forward(request.shard, &VoiceStateUpdate::leave(request.guild_id.clone()))?;
        if self.sessions.remove(&request.guild_id).is_some() {
            info!(guild_id = %request.guild_id, "player session removed");
        }
        Ok(())
    }

    /// Hand voice credentials to the guild's session.
    ///
    /// Returns `false` if the guild has no session.
    pub fn voice_server_update(&mut self, update: VoiceServerUpdate) -> bool {
        match self.sessions.get_mut(&update.guild_id) {
            Some(session) => {
                session.connect(update.session_id, update.event);
                true
            }
            None => {
                debug!(guild_id = %update.guild_id, "voice server update for unknown guild, dropping");
                false
            }
        }
    }

    /// Session for `guild_id`.
    pub fn session(&self, guild_id: &str) -> Option<&PlayerSession> {
        self.sessions.get(guild_id)
    }

    /// Mutable session for `guild_id`, for issuing player commands.
    pub fn session_mut(&mut self, guild_id: &str) -> Option<&mut PlayerSession> {
        self.sessions.get_mut(guild_id)
    }

    /// All sessions.
    pub fn sessions(&self) -> impl Iterator<Item = &PlayerSession> {
        self.sessions.values()
    }

    fn forward(&self, shard: u64, payload: &VoiceStateUpdate) -> Result<()> {
        let data = serde_json::to_value(payload).map_err(EmberError::Serialize)?;
        trace!(shard, guild_id = %payload.guild_id, "forwarding voice state update");
        self.transport.send(shard, VOICE_STATE_UPDATE_OP, data)
    }

    // ── Events ──────────────────────────────────────────────────────────────

    /// Wait for the next node lifecycle event.
    ///
    /// Node messages received meanwhile are routed to their sessions.
    /// Returns `None` only once the signal channel is closed, which cannot
    /// happen while the router is alive.
    pub async fn next_event(&mut self) -> Option<RouterEvent> {
        while let Some(envelope) = self.signals_rx.recv().await {
            if let Some(event) = self.handle_envelope(envelope) {
                return Some(event);
            }
        }
        None
    }

    fn handle_envelope(&mut self, envelope: NodeEnvelope) -> Option<RouterEvent> {
        let NodeEnvelope {
            host,
            connection_id,
            event,
        } = envelope;

        let current = self
            .nodes
            .get(&host)
            .is_some_and(|node| node.id() == connection_id);
        if !current {
            trace!(%host, connection_id, "discarding signal from removed node");
            return None;
        }

        match event {
            NodeEvent::Message(message) => {
                self.demultiplex(&host, &message);
                None
            }
            NodeEvent::Ready => Some(RouterEvent::NodeReady { host }),
            NodeEvent::Reconnecting => Some(RouterEvent::NodeReconnecting { host }),
            NodeEvent::Disconnect { code, reason } => Some(RouterEvent::NodeDisconnected { host, code, reason }),
            NodeEvent::Error(error) => Some(RouterEvent::NodeError { host, error }),
        }
    }

    /// Route one node payload to the session it concerns.
    pub fn demultiplex(&mut self, host: &str, message: &Value) {
        let Some(op) = message_op(message) else {
            trace!(host, "ignoring node message without op");
            return;
        };

        let decoded = match InboundMessage::deserialize(message) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(host, op, error = %err, "undecodable node message, dropping");
                return;
            }
        };

        match decoded {
            InboundMessage::PlayerUpdate(update) => match self.sessions.get_mut(&update.guild_id) {
                Some(session) => session.update_state(update.state),
                None => debug!(host, guild_id = %update.guild_id, "player update for unknown guild"),
            },
            InboundMessage::Event(event) => {
                let Some(session) = self.sessions.get_mut(&event.guild_id) else {
                    debug!(host, guild_id = %event.guild_id, "track event for unknown guild");
                    return;
                };
                match event.kind() {
                    TrackEventKind::End => session.on_end(event),
                    TrackEventKind::Exception => session.on_exception(event),
                    TrackEventKind::Stuck => session.on_stuck(event),
                    TrackEventKind::Other => session.on_unknown(event),
                }
            }
            InboundMessage::Stats(_) => trace!(host, "stats reached router"),
            InboundMessage::Unknown => debug!(host, op, "unhandled node op"),
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────────────

    /// Close every node and drop every session.
    pub fn shutdown(&mut self) {
        for (host, mut node) in self.nodes.drain() {
            node.close();
            debug!(%host, "node closed");
        }
        self.sessions.clear();
        info!("router shut down");
    }
}
