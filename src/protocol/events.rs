use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::types::GuildId;
use crate::protocol::stats::NodeStats;

/// Every message a node can push, classified by the top-level `op`
/// discriminator. Unknown ops land in `Unknown` instead of failing, so a
/// newer node never kills the receive loop.
#[derive(Debug, Clone)]
pub enum NodeMessage {
    PlayerUpdate {
        guild_id: GuildId,
        state: PlayerUpdateState,
    },
    Event(NodeEvent),
    Stats(NodeStats),
    Unknown {
        op: Option<String>,
        raw: Value,
    },
}

/// Authoritative playback state inside a `playerUpdate` push.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateState {
    /// Unix timestamp in milliseconds at which the node sampled this state.
    pub time: u64,
    /// Playback position in milliseconds. Absent when nothing is playing.
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub connected: bool,
}

/// The nested sub-events wrapped in an `op: event` push, discriminated by
/// their `type` tag. Each carries the guild and the encoded track blob.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum NodeEvent {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart { guild_id: GuildId, track: String },

    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd {
        guild_id: GuildId,
        track: String,
        reason: TrackEndReason,
    },

    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck {
        guild_id: GuildId,
        track: String,
        threshold_ms: u64,
    },

    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        guild_id: GuildId,
        track: String,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        exception: Option<TrackException>,
    },
}

impl NodeEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::TrackException { guild_id, .. } => *guild_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    #[serde(alias = "FINISHED")]
    Finished,
    #[serde(alias = "LOAD_FAILED")]
    LoadFailed,
    #[serde(alias = "STOPPED")]
    Stopped,
    #[serde(alias = "REPLACED")]
    Replaced,
    #[serde(alias = "CLEANUP")]
    Cleanup,
}

impl TrackEndReason {
    /// Whether the player is expected to continue with another track.
    pub fn may_start_next(&self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackException {
    pub message: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub cause: Option<String>,
}

/// Exception severity levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    #[serde(alias = "COMMON")]
    Common,
    #[serde(alias = "SUSPICIOUS")]
    Suspicious,
    #[serde(alias = "FAULT")]
    Fault,
}

impl NodeMessage {
    /// Classify a raw inbound frame. Never fails: anything that does not
    /// parse as a known shape comes back as `Unknown` for the caller to log.
    pub fn classify(text: &str) -> Self {
        let raw: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                return Self::Unknown {
                    op: None,
                    raw: Value::String(text.to_string()),
                };
            }
        };

        let op = raw.get("op").and_then(Value::as_str).map(str::to_string);
        match op.as_deref() {
            Some("playerUpdate") => {
                #[derive(Deserialize)]
                #[serde(rename_all = "camelCase")]
                struct Frame {
                    guild_id: GuildId,
                    state: PlayerUpdateState,
                }
                match serde_json::from_value::<Frame>(raw.clone()) {
                    Ok(frame) => Self::PlayerUpdate {
                        guild_id: frame.guild_id,
                        state: frame.state,
                    },
                    Err(_) => Self::Unknown { op, raw },
                }
            }
            Some("stats") => match serde_json::from_value::<NodeStats>(raw.clone()) {
                Ok(stats) => Self::Stats(stats),
                Err(_) => Self::Unknown { op, raw },
            },
            Some("event") => match serde_json::from_value::<NodeEvent>(raw.clone()) {
                Ok(event) => Self::Event(event),
                Err(_) => Self::Unknown { op, raw },
            },
            _ => Self::Unknown { op, raw },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_player_update() {
        let text = r#"{"op":"playerUpdate","guildId":"41771983423143937",
            "state":{"time":1500467109,"position":60000,"connected":true}}"#;
        match NodeMessage::classify(text) {
            NodeMessage::PlayerUpdate { guild_id, state } => {
                assert_eq!(guild_id, GuildId(41771983423143937));
                assert_eq!(state.position, 60000);
                assert!(state.connected);
            }
            other => panic!("expected playerUpdate, got {other:?}"),
        }
    }

    #[test]
    fn classifies_track_start() {
        let text = r#"{"op":"event","type":"TrackStartEvent",
            "guildId":"1","track":"QAAA"}"#;
        match NodeMessage::classify(text) {
            NodeMessage::Event(NodeEvent::TrackStart { guild_id, track }) => {
                assert_eq!(guild_id, GuildId(1));
                assert_eq!(track, "QAAA");
            }
            other => panic!("expected TrackStartEvent, got {other:?}"),
        }
    }

    #[test]
    fn classifies_track_end_with_uppercase_reason() {
        let text = r#"{"op":"event","type":"TrackEndEvent",
            "guildId":"1","track":"QAAA","reason":"FINISHED"}"#;
        match NodeMessage::classify(text) {
            NodeMessage::Event(NodeEvent::TrackEnd { reason, .. }) => {
                assert_eq!(reason, TrackEndReason::Finished);
                assert!(reason.may_start_next());
            }
            other => panic!("expected TrackEndEvent, got {other:?}"),
        }
    }

    #[test]
    fn classifies_track_stuck() {
        let text = r#"{"op":"event","type":"TrackStuckEvent",
            "guildId":"1","track":"QAAA","thresholdMs":10000}"#;
        match NodeMessage::classify(text) {
            NodeMessage::Event(NodeEvent::TrackStuck { threshold_ms, .. }) => {
                assert_eq!(threshold_ms, 10000);
            }
            other => panic!("expected TrackStuckEvent, got {other:?}"),
        }
    }

    #[test]
    fn guild_id_accessor_covers_every_event_kind() {
        let frames = [
            r#"{"op":"event","type":"TrackStartEvent","guildId":"77","track":"QAAA"}"#,
            r#"{"op":"event","type":"TrackEndEvent","guildId":"77","track":"QAAA","reason":"stopped"}"#,
            r#"{"op":"event","type":"TrackStuckEvent","guildId":"77","track":"QAAA","thresholdMs":1}"#,
            r#"{"op":"event","type":"TrackExceptionEvent","guildId":"77","track":"QAAA"}"#,
        ];
        for frame in frames {
            match NodeMessage::classify(frame) {
                NodeMessage::Event(event) => assert_eq!(event.guild_id(), GuildId(77)),
                other => panic!("expected an event, got {other:?}"),
            }
        }
    }

    #[test]
    fn unknown_op_is_preserved_not_fatal() {
        let text = r#"{"op":"shardUpdate","shards":3}"#;
        match NodeMessage::classify(text) {
            NodeMessage::Unknown { op, raw } => {
                assert_eq!(op.as_deref(), Some("shardUpdate"));
                assert_eq!(raw["shards"], 3);
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_preserved() {
        let text = r#"{"op":"event","type":"SegmentsLoadedEvent","guildId":"1"}"#;
        assert!(matches!(
            NodeMessage::classify(text),
            NodeMessage::Unknown { .. }
        ));
    }

    #[test]
    fn unreadable_frame_is_preserved() {
        assert!(matches!(
            NodeMessage::classify("not json at all"),
            NodeMessage::Unknown { op: None, .. }
        ));
    }
}
