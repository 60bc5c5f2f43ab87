use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bridge::{EventBridge, LinkEvent};
use crate::common::{ChannelId, GuildId, LinkResult};
use crate::config::{Config, NodeConfig};
use crate::node::{ChannelEvent, ChannelPayload, NodePool, ReconnectPolicy};
use crate::player::SessionStore;
use crate::protocol::{Equalizer, Filters, NodeMessage, OutboundMessage, Track};
use crate::rest::RestClient;
use crate::voice::{VoiceGateway, VoiceHandshake, VoiceServerInfo};

/// Facade over the whole link runtime: node pool, per-guild sessions, the
/// voice handshake, and the event bridge.
///
/// The host application hands in its gateway capability, feeds the two raw
/// voice confirmations into [`on_voice_state_update`] /
/// [`on_voice_server_update`], and consumes [`LinkEvent`]s from
/// [`events`].
///
/// [`on_voice_state_update`]: Self::on_voice_state_update
/// [`on_voice_server_update`]: Self::on_voice_server_update
/// [`events`]: Self::events
pub struct LinkClient {
    gateway: Arc<dyn VoiceGateway>,
    pool: Arc<NodePool>,
    store: Arc<SessionStore>,
    handshake: Arc<VoiceHandshake>,
    bridge: Arc<EventBridge>,
    rest: RestClient,
    /// Encoded blob -> decoded track, shared with the bridge.
    track_cache: Arc<DashMap<String, Track>>,
    pump: JoinHandle<()>,
}

impl LinkClient {
    /// Wire everything up and register the configured nodes.
    pub async fn connect(gateway: Arc<dyn VoiceGateway>, config: Config) -> LinkResult<Self> {
        let (sink, inbound) = flume::unbounded::<ChannelEvent>();

        let pool = Arc::new(NodePool::new(config.client.clone(), sink));
        let store = Arc::new(SessionStore::new());
        let handshake = Arc::new(VoiceHandshake::new(Duration::from_secs(
            config.client.voice_timeout_secs,
        )));
        let bridge = Arc::new(EventBridge::new());
        let track_cache = Arc::new(DashMap::new());

        match gateway.voice_regions().await {
            Ok(regions) => pool.set_valid_regions(regions),
            Err(e) => warn!("could not fetch voice regions from host: {e}"),
        }

        let pump = tokio::spawn(Self::pump(
            inbound,
            pool.clone(),
            store.clone(),
            bridge.clone(),
            track_cache.clone(),
            ReconnectPolicy::default(),
        ));

        let client = Self {
            gateway,
            pool,
            store,
            handshake,
            bridge,
            rest: RestClient::new()?,
            track_cache,
            pump,
        };

        for node in config.nodes {
            client.add_node(node).await?;
        }
        Ok(client)
    }

    /// Single consumer of all node channels: applies stats, updates session
    /// state, bridges events, and kicks off reconnects.
    async fn pump(
        inbound: flume::Receiver<ChannelEvent>,
        pool: Arc<NodePool>,
        store: Arc<SessionStore>,
        bridge: Arc<EventBridge>,
        track_cache: Arc<DashMap<String, Track>>,
        policy: ReconnectPolicy,
    ) {
        while let Ok(event) = inbound.recv_async().await {
            match event.payload {
                ChannelPayload::Message(message) => {
                    if let NodeMessage::Stats(stats) = &message {
                        pool.update_stats(&event.node, stats.clone());
                    }
                    bridge.dispatch(&event.node, message, &store, &track_cache);
                }
                ChannelPayload::Closed => {
                    if let Some(node) = pool.mark_disconnected(&event.node) {
                        bridge.emit(LinkEvent::NodeDisconnected {
                            node: event.node.clone(),
                        });
                        tokio::spawn(pool.clone().run_reconnect(node, policy.clone()));
                    }
                }
            }
        }
    }

    pub async fn add_node(&self, config: NodeConfig) -> LinkResult<()> {
        self.pool.register(config).await?;
        Ok(())
    }

    /// Re-fetch the valid-region list from the host platform.
    pub async fn refresh_regions(&self) -> LinkResult<()> {
        let regions = self.gateway.voice_regions().await?;
        self.pool.set_valid_regions(regions);
        Ok(())
    }

    /// Receiver of application events, in node delivery order.
    pub fn events(&self) -> flume::Receiver<LinkEvent> {
        self.bridge.subscribe()
    }

    pub fn pool(&self) -> &NodePool {
        &self.pool
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.store
    }

    /// Join a voice channel: runs the two-confirmation handshake, then hands
    /// the completed routing payload to the guild's node.
    pub async fn voice_connect(&self, guild: GuildId, channel: ChannelId) -> LinkResult<()> {
        let info = self
            .handshake
            .initiate(self.gateway.as_ref(), guild, channel)
            .await?;
        self.pool.note_endpoint(guild, info.endpoint.clone());
        self.store.ensure(guild);
        self.forward_voice_update(guild, info)
    }

    /// Stop playback, leave the channel, and drop every per-guild cache.
    /// Best-effort ordering: a failed stop does not block the leave.
    pub async fn disconnect(&self, guild: GuildId) -> LinkResult<()> {
        if let Err(e) = self.stop(guild) {
            debug!(guild = %guild, "stop before disconnect failed: {e}");
        }
        self.handshake
            .teardown(self.gateway.as_ref(), guild)
            .await?;
        self.pool.clear_guild(guild);
        self.store.remove(guild);
        Ok(())
    }

    /// Deliver the gateway's raw voice-state confirmation.
    pub fn on_voice_state_update(&self, guild: GuildId, session_id: String) {
        self.handshake.on_state_update(guild, session_id.into());
    }

    /// Deliver the gateway's raw voice-server confirmation. Outside a
    /// handshake this forwards the update straight to the guild's node
    /// (region moves re-route this way).
    pub fn on_voice_server_update(
        &self,
        guild: GuildId,
        endpoint: String,
        event: Value,
    ) -> LinkResult<()> {
        self.pool.note_endpoint(guild, endpoint.clone());
        if let Some(info) = self.handshake.on_server_update(guild, endpoint, event) {
            self.forward_voice_update(guild, info)?;
        }
        Ok(())
    }

    fn forward_voice_update(&self, guild: GuildId, info: VoiceServerInfo) -> LinkResult<()> {
        let node = self.pool.resolve(guild, None)?;
        node.send(&OutboundMessage::VoiceUpdate {
            guild_id: guild,
            session_id: info.session_id.0,
            event: info.event,
        })
    }

    pub fn play(&self, guild: GuildId, track: &Track) -> LinkResult<()> {
        self.cache_track(track.clone());
        let node = self.pool.resolve(guild, None)?;
        node.send(&OutboundMessage::Play {
            guild_id: guild,
            track: track.encoded.clone(),
            start_time: 0,
            end_time: None,
            volume: None,
            pause: false,
        })?;
        // The wire command starts unpaused; mirror that locally so a
        // previously paused session does not keep a stale flag.
        self.store.set_paused(guild, false);
        Ok(())
    }

    /// Resolve a URL or search identifier and start playback in one step.
    /// Returns the track that was started, or `None` when nothing matched.
    pub async fn play_identifier(
        &self,
        guild: GuildId,
        identifier: &str,
    ) -> LinkResult<Option<Track>> {
        let Some(track) = self.resolve_track(identifier).await? else {
            return Ok(None);
        };
        self.play(guild, &track)?;
        Ok(Some(track))
    }

    pub fn stop(&self, guild: GuildId) -> LinkResult<()> {
        let node = self.pool.resolve(guild, None)?;
        node.send(&OutboundMessage::Stop { guild_id: guild })
    }

    pub fn pause(&self, guild: GuildId) -> LinkResult<()> {
        self.set_paused(guild, true)
    }

    pub fn resume(&self, guild: GuildId) -> LinkResult<()> {
        self.set_paused(guild, false)
    }

    fn set_paused(&self, guild: GuildId, pause: bool) -> LinkResult<()> {
        let node = self.pool.resolve(guild, None)?;
        node.send(&OutboundMessage::Pause {
            guild_id: guild,
            pause,
        })?;
        // Optimistic; the node's next playerUpdate is authoritative.
        self.store.set_paused(guild, pause);
        Ok(())
    }

    /// Seek to a position (milliseconds). Rejected locally when nothing is
    /// playing or the current track is a live stream.
    pub fn seek(&self, guild: GuildId, position_ms: u64) -> LinkResult<()> {
        self.store.validate_seek(guild)?;
        let node = self.pool.resolve(guild, None)?;
        node.send(&OutboundMessage::Seek {
            guild_id: guild,
            position: position_ms,
        })
    }

    /// Set the volume, clamped to 0..=1000. Returns the value actually
    /// stored and sent.
    pub fn set_volume(&self, guild: GuildId, volume: i64) -> LinkResult<u16> {
        let clamped = self.store.set_volume(guild, volume);
        let node = self.pool.resolve(guild, None)?;
        node.send(&OutboundMessage::Volume {
            guild_id: guild,
            volume: clamped,
        })?;
        Ok(clamped)
    }

    pub fn set_equalizer(&self, guild: GuildId, equalizer: &Equalizer) -> LinkResult<()> {
        let node = self.pool.resolve(guild, None)?;
        node.send(&OutboundMessage::Equalizer {
            guild_id: guild,
            bands: equalizer.bands(),
        })
    }

    pub fn set_filters(&self, guild: GuildId, filters: Filters) -> LinkResult<()> {
        let node = self.pool.resolve(guild, None)?;
        node.send(&OutboundMessage::Filters {
            guild_id: guild,
            filters,
        })
    }

    /// Search for tracks. Not guild-scoped: goes to the least-loaded node.
    pub async fn search(&self, query: &str, engine: &str) -> LinkResult<Vec<Track>> {
        let node = self.pool.lowest_penalty()?;
        let tracks = self
            .rest
            .load_tracks(node.config(), &format!("{engine}:{query}"))
            .await?;
        for track in &tracks {
            self.cache_track(track.clone());
        }
        Ok(tracks)
    }

    /// Resolve a URL or identifier into its first matching track.
    pub async fn resolve_track(&self, identifier: &str) -> LinkResult<Option<Track>> {
        let node = self.pool.lowest_penalty()?;
        let mut tracks = self.rest.load_tracks(node.config(), identifier).await?;
        if tracks.is_empty() {
            return Ok(None);
        }
        let track = tracks.remove(0);
        self.cache_track(track.clone());
        Ok(Some(track))
    }

    /// Expand an encoded blob into metadata via the least-loaded node,
    /// falling back on the cache first.
    pub async fn decode_track(&self, encoded: &str) -> LinkResult<Track> {
        if let Some(track) = self.track_cache.get(encoded) {
            return Ok(track.clone());
        }
        let node = self.pool.lowest_penalty()?;
        let track = self.rest.decode_track(node.config(), encoded).await?;
        self.cache_track(track.clone());
        Ok(track)
    }

    pub fn cache_track(&self, track: Track) {
        self.track_cache.insert(track.encoded.clone(), track);
    }
}

impl Drop for LinkClient {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
