use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::common::{ChannelId, GuildId, LinkError, LinkResult, SessionId};
use crate::voice::gateway::VoiceGateway;

/// Everything a node needs to take over a voice connection.
#[derive(Debug, Clone)]
pub struct VoiceServerInfo {
    pub session_id: SessionId,
    pub endpoint: String,
    /// The raw server-update payload, forwarded verbatim to the node.
    pub event: Value,
}

#[derive(Default)]
struct PendingFields {
    session_id: Option<SessionId>,
    endpoint: Option<String>,
    event: Option<Value>,
}

struct Pending {
    fields: Mutex<PendingFields>,
    notify: Notify,
}

impl Pending {
    fn complete(&self) -> Option<VoiceServerInfo> {
        let fields = self.fields.lock();
        Some(VoiceServerInfo {
            session_id: fields.session_id.clone()?,
            endpoint: fields.endpoint.clone()?,
            event: fields.event.clone()?,
        })
    }
}

/// Correlates the two independent join confirmations — the state update
/// carrying a session id and the server update carrying the endpoint — into
/// one ready signal per guild.
///
/// State machine per guild: Idle -> AwaitingConfirmation -> Ready, or back
/// to Idle on timeout or caller cancellation.
pub struct VoiceHandshake {
    pending: DashMap<GuildId, Arc<Pending>>,
    /// Session ids of completed handshakes, needed to re-forward later
    /// server updates (e.g. a region move).
    session_ids: DashMap<GuildId, SessionId>,
    timeout: Duration,
}

impl VoiceHandshake {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            session_ids: DashMap::new(),
            timeout,
        }
    }

    /// Request a voice-channel join and wait for both confirmations.
    ///
    /// Cancellation-safe: dropping this future removes the pending entry, so
    /// an abandoned join leaks nothing.
    pub async fn initiate(
        &self,
        gateway: &dyn VoiceGateway,
        guild: GuildId,
        channel: ChannelId,
    ) -> LinkResult<VoiceServerInfo> {
        info!(guild = %guild, channel = %channel, "initiating voice connection");

        let pending = Arc::new(Pending {
            fields: Mutex::new(PendingFields::default()),
            notify: Notify::new(),
        });
        self.pending.insert(guild, pending.clone());
        let _guard = PendingGuard {
            pending: &self.pending,
            guild,
        };

        gateway.request_join(guild, channel).await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(info) = pending.complete() {
                self.session_ids.insert(guild, info.session_id.clone());
                info!(guild = %guild, endpoint = %info.endpoint, "voice handshake ready");
                return Ok(info);
            }

            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(LinkError::VoiceTimeout { guild });
            };
            if tokio::time::timeout(remaining, pending.notify.notified())
                .await
                .is_err()
            {
                return Err(LinkError::VoiceTimeout { guild });
            }
        }
    }

    /// Deliver the gateway's state confirmation (session id).
    pub fn on_state_update(&self, guild: GuildId, session_id: SessionId) {
        match self.pending.get(&guild) {
            Some(pending) => {
                pending.fields.lock().session_id = Some(session_id);
                pending.notify.notify_one();
            }
            None => {
                // Session refresh outside a handshake; keep the cache warm.
                self.session_ids.insert(guild, session_id);
            }
        }
    }

    /// Deliver the server confirmation (endpoint + routing payload).
    ///
    /// During a handshake this completes the pending correlation and the
    /// `initiate` caller forwards it. Outside one, it returns the completed
    /// info for immediate forwarding, provided a session id is cached.
    pub fn on_server_update(
        &self,
        guild: GuildId,
        endpoint: String,
        event: Value,
    ) -> Option<VoiceServerInfo> {
        if let Some(pending) = self.pending.get(&guild) {
            let mut fields = pending.fields.lock();
            fields.endpoint = Some(endpoint);
            fields.event = Some(event);
            drop(fields);
            pending.notify.notify_one();
            return None;
        }

        match self.session_ids.get(&guild) {
            Some(session_id) => Some(VoiceServerInfo {
                session_id: session_id.clone(),
                endpoint,
                event,
            }),
            None => {
                debug!(guild = %guild, "server update with no cached session id, dropping");
                None
            }
        }
    }

    /// Ask the host to leave and clear the per-guild caches. Stopping
    /// playback first is the caller's job.
    pub async fn teardown(&self, gateway: &dyn VoiceGateway, guild: GuildId) -> LinkResult<()> {
        gateway.request_leave(guild).await?;
        self.pending.remove(&guild);
        self.session_ids.remove(&guild);
        Ok(())
    }

    pub fn session_id(&self, guild: GuildId) -> Option<SessionId> {
        self.session_ids.get(&guild).map(|s| s.clone())
    }

    #[cfg(test)]
    pub(crate) fn has_pending(&self, guild: GuildId) -> bool {
        self.pending.contains_key(&guild)
    }
}

struct PendingGuard<'a> {
    pending: &'a DashMap<GuildId, Arc<Pending>>,
    guild: GuildId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.guild);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingGateway {
        joins: AtomicUsize,
        leaves: AtomicUsize,
    }

    #[async_trait]
    impl VoiceGateway for RecordingGateway {
        async fn request_join(&self, _guild: GuildId, _channel: ChannelId) -> LinkResult<()> {
            self.joins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn request_leave(&self, _guild: GuildId) -> LinkResult<()> {
            self.leaves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn voice_regions(&self) -> LinkResult<Vec<String>> {
            Ok(vec!["eu".into()])
        }
    }

    fn server_event() -> Value {
        serde_json::json!({
            "token": "tok",
            "guild_id": "1",
            "endpoint": "rotterdam0001.example:443"
        })
    }

    #[tokio::test]
    async fn completes_when_state_arrives_first() {
        let hs = Arc::new(VoiceHandshake::new(Duration::from_millis(500)));
        let gateway = RecordingGateway::default();
        let guild = GuildId(1);

        let deliver = {
            let hs = hs.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                hs.on_state_update(guild, SessionId("sess".into()));
                tokio::time::sleep(Duration::from_millis(10)).await;
                let forwarded =
                    hs.on_server_update(guild, "rotterdam0001.example:443".into(), server_event());
                assert!(forwarded.is_none(), "pending handshake consumes the update");
            }
        };

        let (result, _) = tokio::join!(hs.initiate(&gateway, guild, ChannelId(2)), deliver);
        let info = result.unwrap();
        assert_eq!(info.session_id, SessionId("sess".into()));
        assert_eq!(info.endpoint, "rotterdam0001.example:443");
        assert_eq!(gateway.joins.load(Ordering::SeqCst), 1);
        assert!(!hs.has_pending(guild));
        assert_eq!(hs.session_id(guild), Some(SessionId("sess".into())));
    }

    #[tokio::test]
    async fn completes_when_server_arrives_first() {
        let hs = Arc::new(VoiceHandshake::new(Duration::from_millis(500)));
        let gateway = RecordingGateway::default();
        let guild = GuildId(2);

        let deliver = {
            let hs = hs.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                hs.on_server_update(guild, "us-west77.example:443".into(), server_event());
                tokio::time::sleep(Duration::from_millis(10)).await;
                hs.on_state_update(guild, SessionId("abc".into()));
            }
        };

        let (result, _) = tokio::join!(hs.initiate(&gateway, guild, ChannelId(9)), deliver);
        let info = result.unwrap();
        assert_eq!(info.session_id, SessionId("abc".into()));
        assert_eq!(info.endpoint, "us-west77.example:443");
    }

    #[tokio::test]
    async fn times_out_when_only_state_arrives() {
        let hs = Arc::new(VoiceHandshake::new(Duration::from_millis(50)));
        let gateway = RecordingGateway::default();
        let guild = GuildId(3);

        let deliver = {
            let hs = hs.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                hs.on_state_update(guild, SessionId("half".into()));
            }
        };

        let (result, _) = tokio::join!(hs.initiate(&gateway, guild, ChannelId(1)), deliver);
        assert!(matches!(result, Err(LinkError::VoiceTimeout { .. })));
        // Reset to Idle: nothing pending, nothing cached.
        assert!(!hs.has_pending(guild));
        assert_eq!(hs.session_id(guild), None);
    }

    #[tokio::test]
    async fn times_out_when_nothing_arrives() {
        let hs = VoiceHandshake::new(Duration::from_millis(20));
        let gateway = RecordingGateway::default();

        let result = hs.initiate(&gateway, GuildId(4), ChannelId(1)).await;
        assert!(matches!(result, Err(LinkError::VoiceTimeout { .. })));
    }

    #[tokio::test]
    async fn cancellation_clears_pending_state() {
        let hs = Arc::new(VoiceHandshake::new(Duration::from_secs(30)));
        let gateway = Arc::new(RecordingGateway::default());
        let guild = GuildId(5);

        let task = {
            let hs = hs.clone();
            let gateway = gateway.clone();
            tokio::spawn(async move {
                let _ = hs.initiate(gateway.as_ref(), guild, ChannelId(1)).await;
            })
        };

        // Let the join request go out, then abandon the wait.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(hs.has_pending(guild));
        task.abort();
        let _ = task.await;
        assert!(!hs.has_pending(guild));
    }

    #[tokio::test]
    async fn late_server_update_forwards_with_cached_session() {
        let hs = Arc::new(VoiceHandshake::new(Duration::from_millis(500)));
        let gateway = RecordingGateway::default();
        let guild = GuildId(6);

        let deliver = {
            let hs = hs.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                hs.on_state_update(guild, SessionId("keep".into()));
                hs.on_server_update(guild, "eu0001.example".into(), server_event());
            }
        };
        let (result, _) = tokio::join!(hs.initiate(&gateway, guild, ChannelId(1)), deliver);
        result.unwrap();

        // Region move after the handshake: must come back completed.
        let info = hs
            .on_server_update(guild, "us-east42.example".into(), server_event())
            .expect("cached session id should complete the update");
        assert_eq!(info.session_id, SessionId("keep".into()));
        assert_eq!(info.endpoint, "us-east42.example");
    }

    #[tokio::test]
    async fn teardown_clears_caches_and_requests_leave() {
        let hs = VoiceHandshake::new(Duration::from_millis(100));
        let gateway = RecordingGateway::default();
        let guild = GuildId(7);

        hs.on_state_update(guild, SessionId("s".into()));
        assert!(hs.session_id(guild).is_some());

        hs.teardown(&gateway, guild).await.unwrap();
        assert_eq!(gateway.leaves.load(Ordering::SeqCst), 1);
        assert_eq!(hs.session_id(guild), None);
    }
}
