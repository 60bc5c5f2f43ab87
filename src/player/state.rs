use dashmap::DashMap;

use crate::common::{GuildId, LinkError, LinkResult, unix_time_ms};
use crate::protocol::{PlayerUpdateState, Track};

pub const MAX_VOLUME: u16 = 1000;
pub const DEFAULT_VOLUME: u16 = 100;

/// Per-guild playback state.
///
/// Position and connectedness are authoritative from the node's
/// `playerUpdate` pushes. Volume and pause are updated optimistically when
/// the command is issued; last write wins until the node says otherwise.
#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub guild_id: GuildId,
    pub current_track: Option<Track>,
    pub volume: u16,
    pub paused: bool,
    pub playing: bool,
    pub connected: bool,
    /// Last known playback position in milliseconds.
    pub position: u64,
    /// Unix ms at which `position` was observed.
    pub position_at: u64,
}

impl PlayerSession {
    fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            current_track: None,
            volume: DEFAULT_VOLUME,
            paused: false,
            playing: false,
            connected: false,
            position: 0,
            position_at: 0,
        }
    }
}

/// Owned map of every guild's session. Collaborators get a handle to this
/// store; there is no ambient global state.
#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<GuildId, PlayerSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the session if it does not exist yet.
    pub fn ensure(&self, guild: GuildId) {
        self.sessions
            .entry(guild)
            .or_insert_with(|| PlayerSession::new(guild));
    }

    pub fn snapshot(&self, guild: GuildId) -> Option<PlayerSession> {
        self.sessions.get(&guild).map(|s| s.clone())
    }

    pub fn remove(&self, guild: GuildId) {
        self.sessions.remove(&guild);
    }

    /// Overwrites position/connected only; everything else is local state.
    pub fn apply_player_update(&self, guild: GuildId, state: &PlayerUpdateState) {
        let mut session = self
            .sessions
            .entry(guild)
            .or_insert_with(|| PlayerSession::new(guild));
        session.position = state.position;
        session.connected = state.connected;
        session.position_at = if state.time > 0 {
            state.time
        } else {
            unix_time_ms()
        };
    }

    pub fn track_started(&self, guild: GuildId, track: Option<Track>) {
        let mut session = self
            .sessions
            .entry(guild)
            .or_insert_with(|| PlayerSession::new(guild));
        session.current_track = track;
        session.playing = true;
        session.position = 0;
        session.position_at = unix_time_ms();
    }

    /// The end reason is carried by the dispatched event; here it only means
    /// playback stopped.
    pub fn track_ended(&self, guild: GuildId) {
        if let Some(mut session) = self.sessions.get_mut(&guild) {
            session.playing = false;
            session.current_track = None;
        }
    }

    /// Clamp to [0, 1000] and store optimistically. Returns the stored
    /// value, which is what must be sent to the node.
    pub fn set_volume(&self, guild: GuildId, volume: i64) -> u16 {
        let clamped = volume.clamp(0, MAX_VOLUME as i64) as u16;
        let mut session = self
            .sessions
            .entry(guild)
            .or_insert_with(|| PlayerSession::new(guild));
        session.volume = clamped;
        clamped
    }

    pub fn set_paused(&self, guild: GuildId, paused: bool) {
        if let Some(mut session) = self.sessions.get_mut(&guild) {
            session.paused = paused;
        }
    }

    pub fn is_paused(&self, guild: GuildId) -> bool {
        self.sessions.get(&guild).map(|s| s.paused).unwrap_or(false)
    }

    /// Reject seeks that can never succeed, before anything hits the wire.
    pub fn validate_seek(&self, guild: GuildId) -> LinkResult<()> {
        let session = self
            .sessions
            .get(&guild)
            .ok_or(LinkError::NotPlaying { guild })?;
        match &session.current_track {
            None => Err(LinkError::NotPlaying { guild }),
            Some(track) if track.info.is_stream => Err(LinkError::StreamSeek { guild }),
            Some(_) => Ok(()),
        }
    }
}
