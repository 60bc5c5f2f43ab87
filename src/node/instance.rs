use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashSet;
use parking_lot::RwLock;
use tracing::debug;

use crate::common::{GuildId, LinkError, LinkResult};
use crate::config::{ClientConfig, NodeConfig};
use crate::node::channel::{ChannelEvent, ProtocolChannel};
use crate::protocol::{NodeStats, OutboundMessage};

/// One registered node: static config, live statistics, and the channel.
///
/// Owned by the pool; everything else holds it through `Arc` and never the
/// other way around.
#[derive(Debug)]
pub struct Node {
    config: NodeConfig,
    name: String,
    stats: RwLock<Option<NodeStats>>,
    channel: RwLock<Option<ProtocolChannel>>,
    connected: Arc<AtomicBool>,
    /// Guilds with an active player on this node.
    guilds: DashSet<GuildId>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        let name = config.display_name();
        Self {
            config,
            name,
            stats: RwLock::new(None),
            channel: RwLock::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            guilds: DashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn region(&self) -> Option<&str> {
        self.config.region.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Establish (or replace) this node's channel.
    pub async fn connect(
        &self,
        identity: &ClientConfig,
        sink: flume::Sender<ChannelEvent>,
    ) -> LinkResult<()> {
        let channel =
            ProtocolChannel::connect(&self.config, identity, self.connected.clone(), sink)
                .await?;
        *self.channel.write() = Some(channel);
        Ok(())
    }

    pub fn disconnect(&self) {
        if let Some(channel) = self.channel.write().take() {
            channel.shutdown();
        }
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn send(&self, command: &OutboundMessage) -> LinkResult<()> {
        let channel = self.channel.read();
        match channel.as_ref() {
            Some(channel) => channel.send(command),
            None => Err(LinkError::ChannelWrite {
                node: self.name.clone(),
            }),
        }
    }

    /// Stats are only ever written by inbound stat pushes; a stale-by-one
    /// read during selection is fine.
    pub fn update_stats(&self, stats: NodeStats) {
        debug!(node = %self.name, penalty = stats.penalty(), "stats updated");
        *self.stats.write() = Some(stats);
    }

    pub fn stats(&self) -> Option<NodeStats> {
        self.stats.read().clone()
    }

    /// Load-penalty of this node. A node that has not pushed statistics yet
    /// is treated as infinitely loaded so it is never picked over a scored
    /// one.
    pub fn penalty(&self) -> f64 {
        match self.stats.read().as_ref() {
            Some(stats) => stats.penalty(),
            None => f64::INFINITY,
        }
    }

    pub fn claim_guild(&self, guild: GuildId) {
        self.guilds.insert(guild);
    }

    pub fn release_guild(&self, guild: GuildId) {
        self.guilds.remove(&guild);
    }

    pub fn has_guild(&self, guild: GuildId) -> bool {
        self.guilds.contains(&guild)
    }

    #[cfg(test)]
    pub(crate) fn force_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Install a socketless channel and return its outbound frames.
    #[cfg(test)]
    pub(crate) fn install_loopback(
        &self,
    ) -> flume::Receiver<tokio_tungstenite::tungstenite::protocol::Message> {
        let (channel, rx) = ProtocolChannel::loopback(&self.name, self.connected.clone());
        *self.channel.write() = Some(channel);
        rx
    }
}
