use thiserror::Error;

use crate::common::types::GuildId;

/// Everything that can go wrong inside the link runtime.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The node never accepted the TCP/websocket connection.
    #[error("connection to node {node} refused: {message}")]
    ConnectionRefused { node: String, message: String },

    /// The node answered the websocket upgrade with a non-success status,
    /// usually a bad password or an unknown client.
    #[error("node {node} rejected the handshake with status {status}")]
    HandshakeRejected { node: String, status: u16 },

    /// A command could not be written to the node's channel.
    #[error("failed to write to node {node}: channel is closed")]
    ChannelWrite { node: String },

    /// The binary track descriptor could not be decoded.
    #[error("malformed track descriptor: {0}")]
    MalformedTrack(String),

    /// A region was requested that the host platform does not know about.
    #[error("unknown voice region `{0}`")]
    InvalidRegion(String),

    /// The two voice confirmations did not both arrive within the bound.
    #[error("voice handshake for guild {guild} timed out")]
    VoiceTimeout { guild: GuildId },

    /// A playback operation was issued with no track playing.
    #[error("nothing is playing in guild {guild}")]
    NotPlaying { guild: GuildId },

    /// Seeking was attempted on a live stream.
    #[error("cannot seek in a live stream (guild {guild})")]
    StreamSeek { guild: GuildId },

    /// No connected node is left to route the operation to.
    #[error("no connected node available")]
    PoolExhausted,

    /// An equalizer or filter payload failed validation.
    #[error("invalid filter payload: {0}")]
    InvalidFilter(String),

    /// The host gateway capability failed to carry out a request.
    #[error("gateway request failed: {0}")]
    Gateway(String),

    #[error("rest request failed: {0}")]
    Rest(#[from] reqwest::Error),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl LinkError {
    /// True for either flavour of connect failure.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused { .. } | Self::HandshakeRejected { .. }
        )
    }
}

pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_connect_failures_classify_as_connection_errors() {
        let refused = LinkError::ConnectionRefused {
            node: "eu::localhost::2333".into(),
            message: "connection refused".into(),
        };
        let rejected = LinkError::HandshakeRejected {
            node: "eu::localhost::2333".into(),
            status: 401,
        };
        assert!(refused.is_connection_error());
        assert!(rejected.is_connection_error());

        let write = LinkError::ChannelWrite {
            node: "eu::localhost::2333".into(),
        };
        assert!(!write.is_connection_error());
        assert!(!LinkError::PoolExhausted.is_connection_error());
    }
}
