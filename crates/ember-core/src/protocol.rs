//! Wire protocol spoken with audio nodes and with the chat gateway.
//!
//! Node frames are UTF-8 JSON objects discriminated by an `op` field.
//! Outbound commands always carry the guild they address; inbound payloads
//! are either node-wide (`stats`) or guild-scoped (`playerUpdate`, `event`).
//!
//! The chat gateway side only needs one payload: the voice state update a
//! shard sends to join or leave a voice channel.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::ids::{ChannelId, GuildId};
use crate::stats::NodeStats;

/// Operation tags used on the node socket.
pub mod op {
    /// Node statistics broadcast.
    pub const STATS: &str = "stats";
    /// Periodic playback position for one guild.
    pub const PLAYER_UPDATE: &str = "playerUpdate";
    /// Track lifecycle event for one guild.
    pub const EVENT: &str = "event";
}

/// Track event type names carried in `event` payloads.
pub mod event_type {
    /// A track finished, was stopped, or was replaced.
    pub const TRACK_END: &str = "TrackEndEvent";
    /// The node failed to play a track.
    pub const TRACK_EXCEPTION: &str = "TrackExceptionEvent";
    /// A track stopped producing audio.
    pub const TRACK_STUCK: &str = "TrackStuckEvent";
}

/// End reason the node reports when a new `play` replaced the current track.
pub const REASON_REPLACED: &str = "replaced";

/// Read the `op` tag of a raw node payload.
pub fn message_op(message: &Value) -> Option<&str> {
    message.get("op").and_then(Value::as_str)
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Optional fields merged into a `play` command.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayOptions {
    /// Start position in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    /// Stop position in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    /// Ignore the command if a track is already playing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_replace: Option<bool>,
    /// Start paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause: Option<bool>,
    /// Initial volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
}

/// A command sent from a player session to its node.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    /// Hand the node the voice credentials it needs to open its own voice link.
    VoiceUpdate {
        /// Target guild.
        guild_id: GuildId,
        /// Voice session id from the chat gateway.
        session_id: String,
        /// Raw voice server event from the chat gateway.
        event: Value,
    },
    /// Start playing a track.
    Play {
        /// Target guild.
        guild_id: GuildId,
        /// Opaque track identifier.
        track: String,
        /// Optional play parameters.
        #[serde(flatten)]
        options: PlayOptions,
    },
    /// Stop playback.
    Stop {
        /// Target guild.
        guild_id: GuildId,
    },
    /// Pause or resume playback.
    Pause {
        /// Target guild.
        guild_id: GuildId,
        /// `true` to pause.
        pause: bool,
    },
    /// Change the volume.
    Volume {
        /// Target guild.
        guild_id: GuildId,
        /// New volume level.
        volume: u16,
    },
    /// Seek within the current track.
    Seek {
        /// Target guild.
        guild_id: GuildId,
        /// Position in milliseconds.
        position: u64,
    },
}

impl OutboundMessage {
    /// The `op` tag this command serializes with.
    pub fn op(&self) -> &'static str {
        match self {
            Self::VoiceUpdate { .. } => "voiceUpdate",
            Self::Play { .. } => "play",
            Self::Stop { .. } => "stop",
            Self::Pause { .. } => "pause",
            Self::Volume { .. } => "volume",
            Self::Seek { .. } => "seek",
        }
    }

    /// The guild this command addresses.
    pub fn guild_id(&self) -> &GuildId {
        match self {
            Self::VoiceUpdate { guild_id, .. }
            | Self::Play { guild_id, .. }
            | Self::Stop { guild_id }
            | Self::Pause { guild_id, .. }
            | Self::Volume { guild_id, .. }
            | Self::Seek { guild_id, .. } => guild_id,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded node payload.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum InboundMessage {
    /// Node-wide statistics.
    Stats(NodeStats),
    /// Playback position for one guild.
    PlayerUpdate(PlayerUpdate),
    /// Track lifecycle event for one guild.
    Event(TrackEvent),
    /// Any other operation.
    #[serde(other)]
    Unknown,
}

/// Body of a `playerUpdate` payload.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    /// Guild the update belongs to.
    pub guild_id: GuildId,
    /// Latest playback state.
    #[serde(default)]
    pub state: PlayerState,
}

/// Playback state snapshot reported by the node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Node wall clock in unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    /// Track position in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    /// Fields this client does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body of an `event` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEvent {
    /// Guild the event belongs to.
    pub guild_id: GuildId,
    /// Event type name, e.g. `TrackEndEvent`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Track the event concerns, as the node sent it (an encoded string or
    /// a track object, depending on the node version).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<Value>,
    /// End reason (`finished`, `replaced`, `stopped`, ...). Non-string
    /// values decode as `None`.
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub reason: Option<String>,
    /// Remaining fields (`error`, `exception`, `thresholdMs`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => Some(text),
        _ => None,
    })
}

/// Classified [`TrackEvent`] type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackEventKind {
    /// `TrackEndEvent`.
    End,
    /// `TrackExceptionEvent`.
    Exception,
    /// `TrackStuckEvent`.
    Stuck,
    /// Anything else; the name stays in [`TrackEvent::event_type`].
    Other,
}

impl TrackEvent {
    /// Classify the event type.
    pub fn kind(&self) -> TrackEventKind {
        match self.event_type.as_str() {
            event_type::TRACK_END => TrackEventKind::End,
            event_type::TRACK_EXCEPTION => TrackEventKind::Exception,
            event_type::TRACK_STUCK => TrackEventKind::Stuck,
            _ => TrackEventKind::Other,
        }
    }

    /// Whether the track ended because another `play` replaced it.
    pub fn is_replaced(&self) -> bool {
        self.reason.as_deref() == Some(REASON_REPLACED)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat gateway
// ─────────────────────────────────────────────────────────────────────────────

/// Gateway opcode for a voice state update.
pub const VOICE_STATE_UPDATE_OP: u8 = 4;

/// Data of a gateway voice state update. `channel_id: None` leaves the channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStateUpdate {
    /// Guild whose voice state changes.
    pub guild_id: GuildId,
    /// Channel to join, or `None` to disconnect.
    pub channel_id: Option<ChannelId>,
    /// Join muted.
    pub self_mute: bool,
    /// Join deafened.
    pub self_deaf: bool,
}

impl VoiceStateUpdate {
    /// Payload that joins `channel_id`.
    pub fn join(guild_id: GuildId, channel_id: ChannelId, self_mute: bool, self_deaf: bool) -> Self {
        Self {
            guild_id,
            channel_id: Some(channel_id),
            self_mute,
            self_deaf,
        }
    }

    /// Payload that leaves whatever voice channel the bot is in.
    pub fn leave(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            channel_id: None,
            self_mute: false,
            self_deaf: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_value(msg: &OutboundMessage) -> Value {
        serde_json::to_value(msg).unwrap()
    }

    // -- Outbound --

    #[test]
    fn play_without_options_has_exact_shape() {
        let msg = OutboundMessage::Play {
            guild_id: "g1".into(),
            track: "TRACK1".into(),
            options: PlayOptions::default(),
        };
        assert_eq!(
            to_value(&msg),
            json!({"op": "play", "guildId": "g1", "track": "TRACK1"})
        );
    }

    #[test]
    fn play_options_are_flattened() {
        let msg = OutboundMessage::Play {
            guild_id: "g1".into(),
            track: "T".into(),
            options: PlayOptions {
                start_time: Some(1500),
                no_replace: Some(true),
                ..PlayOptions::default()
            },
        };
        let v = to_value(&msg);
        assert_eq!(v["startTime"], 1500);
        assert_eq!(v["noReplace"], true);
        assert!(v.get("endTime").is_none());
        assert!(v.get("options").is_none());
    }

    #[test]
    fn voice_update_shape() {
        let msg = OutboundMessage::VoiceUpdate {
            guild_id: "g1".into(),
            session_id: "sess".into(),
            event: json!({"token": "t", "endpoint": "e"}),
        };
        assert_eq!(
            to_value(&msg),
            json!({
                "op": "voiceUpdate",
                "guildId": "g1",
                "sessionId": "sess",
                "event": {"token": "t", "endpoint": "e"}
            })
        );
    }

    #[test]
    fn simple_commands_shape() {
        let g = GuildId::from("g");
        assert_eq!(
            to_value(&OutboundMessage::Stop { guild_id: g.clone() }),
            json!({"op": "stop", "guildId": "g"})
        );
        assert_eq!(
            to_value(&OutboundMessage::Pause { guild_id: g.clone(), pause: true }),
            json!({"op": "pause", "guildId": "g", "pause": true})
        );
        assert_eq!(
            to_value(&OutboundMessage::Volume { guild_id: g.clone(), volume: 80 }),
            json!({"op": "volume", "guildId": "g", "volume": 80})
        );
        assert_eq!(
            to_value(&OutboundMessage::Seek { guild_id: g, position: 30_000 }),
            json!({"op": "seek", "guildId": "g", "position": 30_000})
        );
    }

    #[test]
    fn op_matches_serialized_tag() {
        let msgs = [
            OutboundMessage::Stop { guild_id: "g".into() },
            OutboundMessage::Seek { guild_id: "g".into(), position: 1 },
            OutboundMessage::Play {
                guild_id: "g".into(),
                track: "t".into(),
                options: PlayOptions::default(),
            },
        ];
        for msg in &msgs {
            assert_eq!(to_value(msg)["op"], msg.op());
            assert_eq!(msg.guild_id().as_str(), "g");
        }
    }

    // -- Inbound --

    #[test]
    fn message_op_reads_tag() {
        assert_eq!(message_op(&json!({"op": "event"})), Some("event"));
        assert_eq!(message_op(&json!({"guildId": "g"})), None);
        assert_eq!(message_op(&json!({"op": 5})), None);
    }

    #[test]
    fn decode_player_update() {
        let raw = json!({
            "op": "playerUpdate",
            "guildId": "g1",
            "state": {"time": 1_700_000_000_000_i64, "position": 4200}
        });
        let InboundMessage::PlayerUpdate(update) = InboundMessage::deserialize(&raw).unwrap()
        else {
            panic!("expected player update");
        };
        assert_eq!(update.guild_id.as_str(), "g1");
        assert_eq!(update.state.position, Some(4200));
        assert_eq!(update.state.time, Some(1_700_000_000_000));
    }

    #[test]
    fn decode_track_end_event() {
        let raw = json!({
            "op": "event",
            "guildId": "g1",
            "type": "TrackEndEvent",
            "track": "TRACK1",
            "reason": "finished"
        });
        let InboundMessage::Event(event) = InboundMessage::deserialize(&raw).unwrap() else {
            panic!("expected event");
        };
        assert_eq!(event.kind(), TrackEventKind::End);
        assert_eq!(event.reason.as_deref(), Some("finished"));
        assert!(!event.is_replaced());
        assert_eq!(event.track, Some(json!("TRACK1")));
        assert!(event.extra.is_empty());
    }

    #[test]
    fn track_event_opaque_fields_never_block_decoding() {
        let raw = json!({
            "op": "event",
            "guildId": "g1",
            "type": "TrackEndEvent",
            "track": {"encoded": "TRACK1", "info": {"length": 1000}},
            "reason": 7
        });
        let InboundMessage::Event(event) = InboundMessage::deserialize(&raw).unwrap() else {
            panic!("expected event");
        };
        assert_eq!(event.kind(), TrackEventKind::End);
        assert_eq!(event.track.unwrap()["encoded"], "TRACK1");
        assert!(event.reason.is_none());
    }

    #[test]
    fn exception_event_keeps_extra_fields() {
        let raw = json!({
            "op": "event",
            "guildId": "g1",
            "type": "TrackExceptionEvent",
            "error": "decoder blew up"
        });
        let InboundMessage::Event(event) = InboundMessage::deserialize(&raw).unwrap() else {
            panic!("expected event");
        };
        assert_eq!(event.kind(), TrackEventKind::Exception);
        assert_eq!(event.extra["error"], "decoder blew up");
    }

    #[test]
    fn unknown_event_type_is_other() {
        let raw = json!({
            "op": "event",
            "guildId": "g1",
            "type": "WebSocketClosedEvent",
            "code": 4006
        });
        let InboundMessage::Event(event) = InboundMessage::deserialize(&raw).unwrap() else {
            panic!("expected event");
        };
        assert_eq!(event.kind(), TrackEventKind::Other);
        assert_eq!(event.event_type, "WebSocketClosedEvent");
        assert_eq!(event.extra["code"], 4006);
    }

    #[test]
    fn unknown_op_decodes_as_unknown() {
        let raw = json!({"op": "somethingNew", "x": 1});
        assert!(matches!(
            InboundMessage::deserialize(&raw).unwrap(),
            InboundMessage::Unknown
        ));
    }

    #[test]
    fn event_without_guild_fails_to_decode() {
        let raw = json!({"op": "event", "type": "TrackEndEvent"});
        assert!(InboundMessage::deserialize(&raw).is_err());
    }

    #[test]
    fn replaced_reason_detected() {
        let event = TrackEvent {
            guild_id: "g".into(),
            event_type: event_type::TRACK_END.into(),
            track: None,
            reason: Some("replaced".into()),
            extra: Map::new(),
        };
        assert!(event.is_replaced());
    }

    // -- Gateway --

    #[test]
    fn voice_state_join_and_leave() {
        let join = VoiceStateUpdate::join("g".into(), "c".into(), false, true);
        assert_eq!(
            serde_json::to_value(&join).unwrap(),
            json!({"guild_id": "g", "channel_id": "c", "self_mute": false, "self_deaf": true})
        );
        let leave = VoiceStateUpdate::leave("g".into());
        assert_eq!(serde_json::to_value(&leave).unwrap()["channel_id"], Value::Null);
    }
}
