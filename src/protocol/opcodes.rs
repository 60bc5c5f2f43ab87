use serde::Serialize;
use serde_json::Value;

use crate::common::types::GuildId;
use crate::protocol::filters::{EqBand, Filters};

/// Commands sent from this client to a node over the websocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Completes the voice handshake on the node side by forwarding the
    /// host gateway's server-update payload plus the cached session id.
    #[serde(rename_all = "camelCase")]
    VoiceUpdate {
        guild_id: GuildId,
        session_id: String,
        event: Value,
    },

    #[serde(rename_all = "camelCase")]
    Play {
        guild_id: GuildId,
        /// The encoded descriptor blob.
        track: String,
        start_time: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume: Option<u16>,
        pause: bool,
    },

    #[serde(rename_all = "camelCase")]
    Stop { guild_id: GuildId },

    #[serde(rename_all = "camelCase")]
    Pause { guild_id: GuildId, pause: bool },

    #[serde(rename_all = "camelCase")]
    Seek {
        guild_id: GuildId,
        /// Target position in milliseconds.
        position: u64,
    },

    #[serde(rename_all = "camelCase")]
    Volume {
        guild_id: GuildId,
        /// 0..=1000, where 100 is unity gain.
        volume: u16,
    },

    #[serde(rename_all = "camelCase")]
    Equalizer {
        guild_id: GuildId,
        bands: Vec<EqBand>,
    },

    #[serde(rename_all = "camelCase")]
    Filters {
        guild_id: GuildId,
        #[serde(flatten)]
        filters: Filters,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::filters::Timescale;

    #[test]
    fn play_serializes_with_camelcase_tag_and_fields() {
        let msg = OutboundMessage::Play {
            guild_id: GuildId(1),
            track: "QAAA".into(),
            start_time: 0,
            end_time: None,
            volume: None,
            pause: false,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["op"], "play");
        assert_eq!(json["guildId"], "1");
        assert_eq!(json["startTime"], 0);
        assert!(json.get("endTime").is_none());
    }

    #[test]
    fn voice_update_carries_raw_event_payload() {
        let msg = OutboundMessage::VoiceUpdate {
            guild_id: GuildId(9),
            session_id: "abc123".into(),
            event: serde_json::json!({ "endpoint": "rotterdam0001.example:443" }),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["op"], "voiceUpdate");
        assert_eq!(json["sessionId"], "abc123");
        assert_eq!(json["event"]["endpoint"], "rotterdam0001.example:443");
    }

    #[test]
    fn filters_payload_merges_at_top_level() {
        let msg = OutboundMessage::Filters {
            guild_id: GuildId(4),
            filters: Filters {
                timescale: Some(Timescale {
                    speed: 1.5,
                    ..Default::default()
                }),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["op"], "filters");
        // Flattened, not nested under a "filters" key.
        assert!(json.get("filters").is_none());
        assert_eq!(json["timescale"]["speed"], 1.5);
    }
}
