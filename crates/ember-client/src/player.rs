//! Per-guild player sessions.
//!
//! A [`PlayerSession`] mirrors the playback state of one guild and turns
//! method calls into node commands. Track lifecycle events routed back from
//! the node update that state and are re-published to subscribers as
//! [`PlayerEvent`]s.

use chrono::{DateTime, Utc};
use ember_core::protocol::{OutboundMessage, PlayOptions, PlayerState, TrackEvent};
use ember_core::{ChannelId, GuildId};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::node::NodeHandle;

/// Capacity of each session's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Track lifecycle notification published by a [`PlayerSession`].
#[derive(Clone, Debug, PartialEq)]
pub enum PlayerEvent {
    /// A track ended, was replaced, or got stuck.
    End(TrackEvent),
    /// The node failed to play a track.
    Error(TrackEvent),
    /// The node sent an event type this client does not know.
    Warn {
        /// Event type name.
        event_type: String,
        /// The event as received.
        event: TrackEvent,
    },
}

/// Playback state of one guild bound to one node.
#[derive(Debug)]
pub struct PlayerSession {
    guild_id: GuildId,
    channel_id: ChannelId,
    node: NodeHandle,
    ready: bool,
    playing: bool,
    paused: bool,
    track: Option<String>,
    state: Option<PlayerState>,
    timestamp: DateTime<Utc>,
    events: broadcast::Sender<PlayerEvent>,
}

impl PlayerSession {
    /// Create an idle session.
    pub fn new(guild_id: GuildId, channel_id: ChannelId, node: NodeHandle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            guild_id,
            channel_id,
            node,
            ready: false,
            playing: false,
            paused: false,
            track: None,
            state: None,
            timestamp: Utc::now(),
            events,
        }
    }

    /// Guild this session plays in.
    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    /// Voice channel joined.
    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Node this session sends through.
    pub fn node(&self) -> &NodeHandle {
        &self.node
    }

    /// Whether voice credentials have been handed to the node.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Whether a track is loaded and not stopped.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Whether playback is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Track currently loaded, if any.
    pub fn track(&self) -> Option<&str> {
        self.track.as_deref()
    }

    /// Last playback state the node reported.
    pub fn state(&self) -> Option<&PlayerState> {
        self.state.as_ref()
    }

    /// When the current track was started.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Receive this session's [`PlayerEvent`]s.
    ///
    /// The receiver closes when the session is removed.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    // ── Commands ────────────────────────────────────────────────────────────

    /// Forward voice credentials to the node and mark the session ready.
    pub fn connect(&mut self, session_id: impl Into<String>, event: Value) {
        let _ = self.send(OutboundMessage::VoiceUpdate {
            guild_id: self.guild_id.clone(),
            session_id: session_id.into(),
            event,
        });
        self.ready = true;
    }

    /// Play `track`, replacing whatever is playing.
    ///
    /// `options.pause`, when set, becomes the session's paused state.
    pub fn play(&mut self, track: impl Into<String>, options: PlayOptions) {
        let track = track.into();
        if let Some(pause) = options.pause {
            self.paused = pause;
        }
        let _ = self.send(OutboundMessage::Play {
            guild_id: self.guild_id.clone(),
            track: track.clone(),
            options,
        });
        self.track = Some(track);
        self.playing = true;
        self.timestamp = Utc::now();
    }

    /// Stop playback.
    pub fn stop(&mut self) {
        let _ = self.send(OutboundMessage::Stop {
            guild_id: self.guild_id.clone(),
        });
        self.playing = false;
        self.track = None;
    }

    /// Pause or resume. Nothing is sent if already in that state.
    pub fn pause(&mut self, pause: bool) {
        if self.paused == pause {
            return;
        }
        let _ = self.send(OutboundMessage::Pause {
            guild_id: self.guild_id.clone(),
            pause,
        });
        self.paused = pause;
    }

    /// Set the volume.
    pub fn volume(&self, volume: u16) {
        let _ = self.send(OutboundMessage::Volume {
            guild_id: self.guild_id.clone(),
            volume,
        });
    }

    /// Seek to `position` milliseconds.
    pub fn seek(&self, position: u64) {
        let _ = self.send(OutboundMessage::Seek {
            guild_id: self.guild_id.clone(),
            position,
        });
    }

    fn send(&self, message: OutboundMessage) -> bool {
        let sent = self.node.send(&message);
        if !sent {
            debug!(guild_id = %self.guild_id, op = message.op(), "player command not delivered");
        }
        sent
    }

    // ── Node events ─────────────────────────────────────────────────────────

    /// Replace the stored playback state.
    pub fn update_state(&mut self, state: PlayerState) {
        self.state = Some(state);
    }

    /// Handle a `TrackEndEvent`.
    ///
    /// A track replaced by a newer `play` leaves the new track in place;
    /// subscribers are notified either way.
    pub fn on_end(&mut self, event: TrackEvent) {
        if event.is_replaced() {
            debug!(guild_id = %self.guild_id, "track replaced");
        } else {
            self.track = None;
            self.playing = false;
        }
        self.emit(PlayerEvent::End(event));
    }

    /// Handle a `TrackExceptionEvent`.
    pub fn on_exception(&mut self, event: TrackEvent) {
        warn!(guild_id = %self.guild_id, track = ?event.track, "track exception");
        self.emit(PlayerEvent::Error(event));
    }

    /// Handle a `TrackStuckEvent`: stop, then report the track as ended.
    pub fn on_stuck(&mut self, event: TrackEvent) {
        warn!(guild_id = %self.guild_id, track = ?event.track, "track stuck, stopping");
        self.stop();
        self.emit(PlayerEvent::End(event));
    }

    /// Handle an event type with no dedicated handler.
    pub fn on_unknown(&mut self, event: TrackEvent) {
        debug!(guild_id = %self.guild_id, event_type = %event.event_type, "unhandled track event");
        self.emit(PlayerEvent::Warn {
            event_type: event.event_type.clone(),
            event,
        });
    }

    fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
