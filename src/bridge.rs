use dashmap::DashMap;
use tracing::debug;

use crate::common::GuildId;
use crate::player::SessionStore;
use crate::protocol::{
    NodeEvent, NodeMessage, NodeStats, PlayerUpdateState, Track, TrackEndReason, TrackException,
};

/// Application-facing events, one per node push, in delivery order.
///
/// Each carries enough context to react without re-querying the node.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    TrackStart {
        guild_id: GuildId,
        /// Decoded metadata, when the blob was cached or decodes locally.
        track: Option<Track>,
        encoded: String,
    },
    TrackEnd {
        guild_id: GuildId,
        encoded: String,
        reason: TrackEndReason,
    },
    TrackStuck {
        guild_id: GuildId,
        encoded: String,
        threshold_ms: u64,
    },
    TrackException {
        guild_id: GuildId,
        encoded: String,
        error: Option<String>,
        exception: Option<TrackException>,
    },
    PlayerUpdate {
        guild_id: GuildId,
        state: PlayerUpdateState,
    },
    StatsUpdate {
        node: String,
        stats: NodeStats,
    },
    /// A node's channel closed; its guilds will re-balance on next use.
    NodeDisconnected {
        node: String,
    },
}

/// Converts classified node messages into [`LinkEvent`]s.
///
/// Session state is updated before dispatch, and dispatch order is exactly
/// arrival order: one pump task feeds this, and the flume channel is FIFO.
pub struct EventBridge {
    tx: flume::Sender<LinkEvent>,
    rx: flume::Receiver<LinkEvent>,
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBridge {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    /// Receiver half for the application. Clone-cheap.
    pub fn subscribe(&self) -> flume::Receiver<LinkEvent> {
        self.rx.clone()
    }

    pub fn emit(&self, event: LinkEvent) {
        let _ = self.tx.send(event);
    }

    /// Apply one inbound message to the session store, then dispatch it.
    pub fn dispatch(
        &self,
        node: &str,
        message: NodeMessage,
        store: &SessionStore,
        track_cache: &DashMap<String, Track>,
    ) {
        match message {
            NodeMessage::PlayerUpdate { guild_id, state } => {
                store.apply_player_update(guild_id, &state);
                self.emit(LinkEvent::PlayerUpdate { guild_id, state });
            }
            NodeMessage::Stats(stats) => {
                self.emit(LinkEvent::StatsUpdate {
                    node: node.to_string(),
                    stats,
                });
            }
            NodeMessage::Event(event) => self.dispatch_event(event, store, track_cache),
            NodeMessage::Unknown { op, .. } => {
                debug!(node, "not bridging unrecognized message (op {op:?})");
            }
        }
    }

    fn dispatch_event(
        &self,
        event: NodeEvent,
        store: &SessionStore,
        track_cache: &DashMap<String, Track>,
    ) {
        match event {
            NodeEvent::TrackStart { guild_id, track } => {
                let resolved = track_cache
                    .get(&track)
                    .map(|t| t.clone())
                    .or_else(|| Track::decode(&track).ok());
                store.track_started(guild_id, resolved.clone());
                self.emit(LinkEvent::TrackStart {
                    guild_id,
                    track: resolved,
                    encoded: track,
                });
            }
            NodeEvent::TrackEnd {
                guild_id,
                track,
                reason,
            } => {
                store.track_ended(guild_id);
                self.emit(LinkEvent::TrackEnd {
                    guild_id,
                    encoded: track,
                    reason,
                });
            }
            NodeEvent::TrackStuck {
                guild_id,
                track,
                threshold_ms,
            } => {
                self.emit(LinkEvent::TrackStuck {
                    guild_id,
                    encoded: track,
                    threshold_ms,
                });
            }
            NodeEvent::TrackException {
                guild_id,
                track,
                error,
                exception,
            } => {
                self.emit(LinkEvent::TrackException {
                    guild_id,
                    encoded: track,
                    error,
                    exception,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TrackInfo;

    fn encoded_track() -> String {
        Track::from_info(TrackInfo {
            identifier: "xyz".into(),
            is_seekable: true,
            author: "a".into(),
            length: 60_000,
            is_stream: false,
            position: 0,
            title: "t".into(),
            uri: None,
            source_name: "http".into(),
        })
        .encoded
    }

    #[test]
    fn dispatches_in_arrival_order() {
        let bridge = EventBridge::new();
        let store = SessionStore::new();
        let cache = DashMap::new();
        let rx = bridge.subscribe();
        let guild = GuildId(10);
        let encoded = encoded_track();

        let frames = [
            format!(
                r#"{{"op":"event","type":"TrackStartEvent","guildId":"10","track":"{encoded}"}}"#
            ),
            r#"{"op":"playerUpdate","guildId":"10","state":{"time":1,"position":5,"connected":true}}"#
                .to_string(),
            format!(
                r#"{{"op":"event","type":"TrackEndEvent","guildId":"10","track":"{encoded}","reason":"finished"}}"#
            ),
        ];
        for frame in &frames {
            bridge.dispatch("n1", NodeMessage::classify(frame), &store, &cache);
        }

        match rx.try_recv().unwrap() {
            LinkEvent::TrackStart { guild_id, .. } => assert_eq!(guild_id, guild),
            other => panic!("expected TrackStart first, got {other:?}"),
        }
        match rx.try_recv().unwrap() {
            LinkEvent::PlayerUpdate { guild_id, state } => {
                assert_eq!(guild_id, guild);
                assert_eq!(state.position, 5);
            }
            other => panic!("expected PlayerUpdate second, got {other:?}"),
        }
        match rx.try_recv().unwrap() {
            LinkEvent::TrackEnd {
                guild_id, reason, ..
            } => {
                assert_eq!(guild_id, guild);
                assert_eq!(reason, TrackEndReason::Finished);
            }
            other => panic!("expected TrackEnd third, got {other:?}"),
        }
        assert!(rx.try_recv().is_err(), "exactly three events");
    }

    #[test]
    fn track_start_installs_decoded_track() {
        let bridge = EventBridge::new();
        let store = SessionStore::new();
        let cache = DashMap::new();
        let guild = GuildId(11);
        let encoded = encoded_track();

        bridge.dispatch(
            "n1",
            NodeMessage::classify(&format!(
                r#"{{"op":"event","type":"TrackStartEvent","guildId":"11","track":"{encoded}"}}"#
            )),
            &store,
            &cache,
        );

        let session = store.snapshot(guild).unwrap();
        assert!(session.playing);
        let track = session.current_track.expect("track decoded from blob");
        assert_eq!(track.info.identifier, "xyz");
    }

    #[test]
    fn track_start_prefers_cached_track() {
        let bridge = EventBridge::new();
        let store = SessionStore::new();
        let cache: DashMap<String, Track> = DashMap::new();
        let encoded = encoded_track();

        let mut cached = Track::decode(&encoded).unwrap();
        cached.info.title = "from-cache".into();
        cache.insert(encoded.clone(), cached);

        bridge.dispatch(
            "n1",
            NodeMessage::classify(&format!(
                r#"{{"op":"event","type":"TrackStartEvent","guildId":"12","track":"{encoded}"}}"#
            )),
            &store,
            &cache,
        );

        let session = store.snapshot(GuildId(12)).unwrap();
        assert_eq!(session.current_track.unwrap().info.title, "from-cache");
    }

    #[test]
    fn unknown_messages_are_not_bridged() {
        let bridge = EventBridge::new();
        let store = SessionStore::new();
        let cache = DashMap::new();
        let rx = bridge.subscribe();

        bridge.dispatch(
            "n1",
            NodeMessage::classify(r#"{"op":"somethingNew"}"#),
            &store,
            &cache,
        );
        assert!(rx.try_recv().is_err());
    }
}
