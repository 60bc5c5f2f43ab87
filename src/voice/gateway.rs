use async_trait::async_trait;

use crate::common::{ChannelId, GuildId, LinkResult};

/// Host-platform voice capability consumed by the handshake.
///
/// The host owns the gateway socket; the link only asks it to join or leave
/// a channel and is told about the resulting confirmations through
/// [`crate::client::LinkClient::on_voice_state_update`] and
/// [`crate::client::LinkClient::on_voice_server_update`].
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Ask the host to join the voice channel. The confirmations arrive
    /// asynchronously, in either order.
    async fn request_join(&self, guild: GuildId, channel: ChannelId) -> LinkResult<()>;

    /// Ask the host to leave whatever voice channel it occupies in the guild.
    async fn request_leave(&self, guild: GuildId) -> LinkResult<()>;

    /// The region ids the platform currently advertises. Used to validate
    /// node regions and endpoint-derived hints.
    async fn voice_regions(&self) -> LinkResult<Vec<String>>;
}
