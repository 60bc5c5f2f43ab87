//! Client runtime for Lavalink-style audio nodes.
//!
//! A [`LinkClient`] owns a pool of node connections, balances guilds across
//! them by load penalty, runs the two-confirmation voice handshake, and
//! bridges node pushes into ordered [`LinkEvent`]s for the host application.

pub mod bridge;
pub mod client;
pub mod common;
pub mod config;
pub mod node;
pub mod player;
pub mod protocol;
pub mod rest;
pub mod voice;

pub use bridge::{EventBridge, LinkEvent};
pub use client::LinkClient;
pub use common::{ChannelId, GuildId, LinkError, LinkResult, SessionId, UserId};
pub use config::{ClientConfig, Config, NodeConfig};
pub use node::{Node, NodePool, ReconnectPolicy};
pub use player::{PlayerSession, SessionStore};
pub use protocol::{
    Equalizer, Filters, NodeMessage, NodeStats, OutboundMessage, Track, TrackEndReason, TrackInfo,
};
pub use voice::{VoiceGateway, VoiceHandshake, VoiceServerInfo};
