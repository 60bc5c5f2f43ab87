use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::common::{GuildId, LinkError, LinkResult};
use crate::config::{ClientConfig, NodeConfig};
use crate::node::channel::ChannelEvent;
use crate::node::instance::Node;
use crate::node::reconnect::ReconnectPolicy;
use crate::protocol::NodeStats;

/// `rotterdam0001.discord.media:443` -> `rotterdam`
fn region_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\w.*?)\d").unwrap())
}

/// Registry of nodes plus the guild -> node balancer.
///
/// Owns every `Node`; collaborators receive `Arc<Node>` handles and never a
/// back-reference to the pool.
pub struct NodePool {
    identity: ClientConfig,
    sink: flume::Sender<ChannelEvent>,
    nodes: RwLock<Vec<Arc<Node>>>,
    /// At most one assignment per guild. Only invalidated explicitly, on
    /// node loss or teardown.
    assignments: DashMap<GuildId, Arc<Node>>,
    /// Last voice endpoint observed per guild, kept as a regional hint.
    endpoints: DashMap<GuildId, String>,
    /// Region ids the host platform currently advertises.
    valid_regions: RwLock<Vec<String>>,
}

impl NodePool {
    pub fn new(identity: ClientConfig, sink: flume::Sender<ChannelEvent>) -> Self {
        Self {
            identity,
            sink,
            nodes: RwLock::new(Vec::new()),
            assignments: DashMap::new(),
            endpoints: DashMap::new(),
            valid_regions: RwLock::new(Vec::new()),
        }
    }

    /// Add a node and bring its channel up. Statistics start undefined, so
    /// the node is not preferred until its first stats push.
    pub async fn register(&self, config: NodeConfig) -> LinkResult<Arc<Node>> {
        if let Some(region) = &config.region {
            self.validate_region(region)?;
        }
        let node = Arc::new(Node::new(config));
        node.connect(&self.identity, self.sink.clone()).await?;
        self.adopt(node.clone());
        info!(node = %node.name(), "registered node");
        Ok(node)
    }

    pub(crate) fn adopt(&self, node: Arc<Node>) {
        self.nodes.write().push(node);
    }

    /// Remove a node from the pool entirely, dropping its assignments.
    pub fn remove(&self, name: &str) -> Option<Arc<Node>> {
        let mut nodes = self.nodes.write();
        let index = nodes.iter().position(|n| n.name() == name)?;
        let node = nodes.remove(index);
        drop(nodes);

        node.disconnect();
        self.assignments.retain(|_, n| n.name() != name);
        Some(node)
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    pub fn node_by_name(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .iter()
            .find(|n| n.name() == name)
            .cloned()
    }

    pub fn set_valid_regions(&self, regions: Vec<String>) {
        *self.valid_regions.write() = regions;
    }

    fn validate_region(&self, region: &str) -> LinkResult<()> {
        let regions = self.valid_regions.read();
        // An empty cache means the host capability was never queried; skip
        // validation rather than reject everything.
        if !regions.is_empty() && !regions.iter().any(|r| r == region) {
            return Err(LinkError::InvalidRegion(region.to_string()));
        }
        Ok(())
    }

    /// Remember the voice endpoint a guild was routed to, as a region hint
    /// for later assignment.
    pub fn note_endpoint(&self, guild: GuildId, endpoint: String) {
        self.endpoints.insert(guild, endpoint);
    }

    /// Letters-before-trailing-digits prefix of a voice endpoint.
    pub fn extract_region(endpoint: &str) -> Option<String> {
        region_pattern()
            .captures(endpoint)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Resolve the node responsible for a guild, assigning one if needed.
    ///
    /// Order: cached assignment (if still connected), then any connected
    /// node that already claims the guild, then the lowest-penalty node in
    /// the preferred region (falling back to all connected nodes when the
    /// region is empty or unknown only by hint).
    pub fn resolve(&self, guild: GuildId, preferred_region: Option<&str>) -> LinkResult<Arc<Node>> {
        if let Some(existing) = self.assignments.get(&guild) {
            if existing.is_connected() {
                return Ok(existing.clone());
            }
        }
        // Stale assignment to a dead node: drop it and re-balance.
        self.assignments.remove_if(&guild, |_, n| !n.is_connected());

        let region = match preferred_region {
            Some(region) => {
                self.validate_region(region)?;
                Some(region.to_string())
            }
            None => match self
                .endpoints
                .get(&guild)
                .and_then(|e| Self::extract_region(e.value()))
            {
                Some(hint) => {
                    if self.validate_region(&hint).is_err() {
                        warn!(guild = %guild, "ignoring unknown derived region hint `{hint}`");
                        None
                    } else {
                        Some(hint)
                    }
                }
                None => None,
            },
        };

        // Entry holds the shard lock, so two concurrent resolutions of the
        // same guild cannot pick two different nodes.
        match self.assignments.entry(guild) {
            Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let node = self.select(guild, region.as_deref())?;
                node.claim_guild(guild);
                vacant.insert(node.clone());
                debug!(guild = %guild, node = %node.name(), "assigned guild to node");
                Ok(node)
            }
        }
    }

    fn select(&self, guild: GuildId, region: Option<&str>) -> LinkResult<Arc<Node>> {
        let connected: Vec<Arc<Node>> = self
            .nodes
            .read()
            .iter()
            .filter(|n| n.is_connected())
            .cloned()
            .collect();
        if connected.is_empty() {
            return Err(LinkError::PoolExhausted);
        }

        if let Some(claimer) = connected.iter().find(|n| n.has_guild(guild)) {
            return Ok(claimer.clone());
        }

        if let Some(region) = region {
            let regional: Vec<Arc<Node>> = connected
                .iter()
                .filter(|n| n.region() == Some(region))
                .cloned()
                .collect();
            if !regional.is_empty() {
                return Self::ideal_of(&regional);
            }
            debug!("no connected node serves region `{region}`, falling back to all nodes");
        }

        Self::ideal_of(&connected)
    }

    /// First node with minimal penalty; ties break by iteration order.
    fn ideal_of(candidates: &[Arc<Node>]) -> LinkResult<Arc<Node>> {
        let mut best: Option<(f64, &Arc<Node>)> = None;
        for node in candidates {
            let penalty = node.penalty();
            if best.map_or(true, |(lowest, _)| penalty < lowest) {
                best = Some((penalty, node));
            }
        }
        match best {
            Some((penalty, node)) => {
                debug!(node = %node.name(), penalty, "selected ideal node");
                Ok(node.clone())
            }
            None => Err(LinkError::PoolExhausted),
        }
    }

    /// The lowest-penalty connected node, regardless of guild assignment.
    /// Track resolution and decoding go here.
    pub fn lowest_penalty(&self) -> LinkResult<Arc<Node>> {
        let connected: Vec<Arc<Node>> = self
            .nodes
            .read()
            .iter()
            .filter(|n| n.is_connected())
            .cloned()
            .collect();
        Self::ideal_of(&connected)
    }

    pub fn update_stats(&self, node_name: &str, stats: NodeStats) {
        if let Some(node) = self.node_by_name(node_name) {
            node.update_stats(stats);
        }
    }

    /// Degrade a node out of the selectable set after its channel closed.
    /// Its assignments are invalidated so the next guild operation
    /// re-balances onto a surviving node.
    pub fn mark_disconnected(&self, name: &str) -> Option<Arc<Node>> {
        let node = self.node_by_name(name)?;
        node.disconnect();
        self.assignments.retain(|_, n| n.name() != name);
        Some(node)
    }

    /// Drop every per-guild cache: assignment, claim, endpoint hint.
    pub fn clear_guild(&self, guild: GuildId) {
        if let Some((_, node)) = self.assignments.remove(&guild) {
            node.release_guild(guild);
        }
        self.endpoints.remove(&guild);
    }

    /// Re-dial a dropped node under the given policy. Spawned by the event
    /// pump on a `Closed` notice.
    pub async fn run_reconnect(self: Arc<Self>, node: Arc<Node>, policy: ReconnectPolicy) {
        let mut attempt = 1;
        while let Some(delay) = policy.delay_for(attempt) {
            tokio::time::sleep(delay).await;
            match node.connect(&self.identity, self.sink.clone()).await {
                Ok(()) => {
                    info!(node = %node.name(), attempt, "reconnected");
                    return;
                }
                Err(e) => {
                    warn!(node = %node.name(), attempt, "reconnect failed: {e}");
                    attempt += 1;
                }
            }
        }
        warn!(node = %node.name(), "reconnect budget exhausted, leaving node offline");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::stats::{Cpu, FrameStats};

    fn identity() -> ClientConfig {
        ClientConfig {
            user_id: 1,
            client_name: "ferrolink".into(),
            voice_timeout_secs: 5,
        }
    }

    fn pool() -> NodePool {
        let (sink, _keep) = flume::unbounded();
        // Leak the receiver so channel sends would not fail in tests.
        std::mem::forget(_keep);
        NodePool::new(identity(), sink)
    }

    fn test_node(name: &str, region: Option<&str>, playing: i32, load: f64) -> Arc<Node> {
        let node = Arc::new(Node::new(NodeConfig {
            host: "localhost".into(),
            port: 2333,
            password: "pw".into(),
            region: region.map(str::to_string),
            name: Some(name.into()),
        }));
        node.force_connected(true);
        node.update_stats(NodeStats {
            players: playing,
            playing_players: playing,
            uptime: 1000,
            memory: None,
            cpu: Cpu {
                cores: 4,
                system_load: load,
                lavalink_load: 0.0,
            },
            frame_stats: Some(FrameStats {
                sent: 3000,
                nulled: 0,
                deficit: 0,
            }),
        });
        node
    }

    #[test]
    fn resolve_is_sticky_per_guild() {
        let pool = pool();
        pool.adopt(test_node("a", None, 5, 0.1));
        pool.adopt(test_node("b", None, 0, 0.1));

        let first = pool.resolve(GuildId(1), None).unwrap();
        assert_eq!(first.name(), "b");

        // Load flips, but the assignment must not move.
        pool.update_stats("b", NodeStats {
            players: 90,
            playing_players: 90,
            uptime: 1000,
            memory: None,
            cpu: Cpu {
                cores: 4,
                system_load: 0.9,
                lavalink_load: 0.0,
            },
            frame_stats: None,
        });
        let second = pool.resolve(GuildId(1), None).unwrap();
        assert_eq!(second.name(), "b");
    }

    #[test]
    fn resolve_prefers_existing_claimer() {
        let pool = pool();
        let busy = test_node("busy", None, 50, 0.8);
        busy.claim_guild(GuildId(7));
        pool.adopt(busy);
        pool.adopt(test_node("idle", None, 0, 0.0));

        let resolved = pool.resolve(GuildId(7), None).unwrap();
        assert_eq!(resolved.name(), "busy");
    }

    #[test]
    fn resolve_prefers_regional_node() {
        let pool = pool();
        pool.set_valid_regions(vec!["eu".into(), "us".into()]);
        pool.adopt(test_node("eu-node", Some("eu"), 10, 0.5));
        pool.adopt(test_node("us-node", Some("us"), 0, 0.0));

        // The eu node is busier, but region wins within its partition.
        let resolved = pool.resolve(GuildId(2), Some("eu")).unwrap();
        assert_eq!(resolved.name(), "eu-node");
    }

    #[test]
    fn resolve_falls_back_when_region_is_empty() {
        let pool = pool();
        pool.set_valid_regions(vec!["eu".into(), "us".into()]);
        pool.adopt(test_node("us-a", Some("us"), 3, 0.2));
        pool.adopt(test_node("us-b", Some("us"), 1, 0.2));

        let resolved = pool.resolve(GuildId(3), Some("eu")).unwrap();
        assert_eq!(resolved.name(), "us-b");
    }

    #[test]
    fn resolve_rejects_unknown_region() {
        let pool = pool();
        pool.set_valid_regions(vec!["eu".into()]);
        pool.adopt(test_node("a", Some("eu"), 0, 0.0));

        let err = pool.resolve(GuildId(4), Some("atlantis")).unwrap_err();
        assert!(matches!(err, LinkError::InvalidRegion(_)));
    }

    #[test]
    fn unscored_node_is_never_picked_over_scored() {
        let pool = pool();
        let fresh = Arc::new(Node::new(NodeConfig {
            host: "localhost".into(),
            port: 2334,
            password: "pw".into(),
            region: None,
            name: Some("fresh".into()),
        }));
        fresh.force_connected(true);
        pool.adopt(fresh);
        pool.adopt(test_node("scored", None, 80, 0.9));

        let resolved = pool.resolve(GuildId(5), None).unwrap();
        assert_eq!(resolved.name(), "scored");
    }

    #[test]
    fn empty_pool_is_exhausted() {
        let pool = pool();
        assert!(matches!(
            pool.resolve(GuildId(6), None),
            Err(LinkError::PoolExhausted)
        ));
        assert!(matches!(
            pool.lowest_penalty(),
            Err(LinkError::PoolExhausted)
        ));
    }

    #[test]
    fn dead_assignment_rebalances_to_survivor() {
        let pool = pool();
        pool.adopt(test_node("a", None, 0, 0.0));
        pool.adopt(test_node("b", None, 5, 0.1));

        let first = pool.resolve(GuildId(8), None).unwrap();
        assert_eq!(first.name(), "a");

        pool.mark_disconnected("a");
        let second = pool.resolve(GuildId(8), None).unwrap();
        assert_eq!(second.name(), "b");
    }

    #[test]
    fn endpoint_hint_steers_resolution() {
        let pool = pool();
        pool.set_valid_regions(vec!["rotterdam".into(), "us-west".into()]);
        pool.adopt(test_node("eu", Some("rotterdam"), 20, 0.6));
        pool.adopt(test_node("us", Some("us-west"), 0, 0.0));

        pool.note_endpoint(GuildId(9), "rotterdam0001.discord.media:443".into());
        let resolved = pool.resolve(GuildId(9), None).unwrap();
        assert_eq!(resolved.name(), "eu");
    }

    #[test]
    fn region_extraction_matches_prefix_before_digits() {
        assert_eq!(
            NodePool::extract_region("rotterdam0001.discord.media:443").as_deref(),
            Some("rotterdam")
        );
        assert_eq!(
            NodePool::extract_region("us-west1234.example").as_deref(),
            Some("us-west")
        );
        assert_eq!(NodePool::extract_region("no-digits-here"), None);
    }

    #[test]
    fn clear_guild_drops_all_caches() {
        let pool = pool();
        pool.adopt(test_node("a", None, 0, 0.0));
        pool.note_endpoint(GuildId(10), "eu0001.example".into());

        let node = pool.resolve(GuildId(10), None).unwrap();
        assert!(node.has_guild(GuildId(10)));

        pool.clear_guild(GuildId(10));
        assert!(!node.has_guild(GuildId(10)));
        assert!(pool.endpoints.get(&GuildId(10)).is_none());
    }
}
