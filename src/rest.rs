use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::common::LinkResult;
use crate::config::NodeConfig;
use crate::protocol::{Track, TrackInfo};

/// Request/response capability against a node's REST surface. Only track
/// search and decode live here; playback control is all websocket.
pub struct RestClient {
    http: Client,
}

#[derive(Deserialize)]
struct LoadTracksResponse {
    #[serde(default)]
    tracks: Vec<Track>,
}

impl RestClient {
    pub fn new() -> LinkResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http })
    }

    /// `GET /loadtracks?identifier=<query>` — resolve a URL or search query
    /// into playable tracks.
    pub async fn load_tracks(
        &self,
        node: &NodeConfig,
        identifier: &str,
    ) -> LinkResult<Vec<Track>> {
        let url = format!(
            "http://{}:{}/loadtracks?identifier={}",
            node.host,
            node.port,
            urlencoding::encode(identifier)
        );
        debug!(node = %node.display_name(), "loadtracks :: {identifier}");

        let response: LoadTracksResponse = self
            .http
            .get(&url)
            .header("Authorization", &node.password)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.tracks)
    }

    /// `GET /decodetrack?track=<encoded>` — ask the node to expand an
    /// encoded blob into metadata.
    pub async fn decode_track(&self, node: &NodeConfig, encoded: &str) -> LinkResult<Track> {
        let url = format!(
            "http://{}:{}/decodetrack?track={}",
            node.host,
            node.port,
            urlencoding::encode(encoded)
        );
        debug!(node = %node.display_name(), "decodetrack");

        let info: TrackInfo = self
            .http
            .get(&url)
            .header("Authorization", &node.password)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(Track {
            encoded: encoded.to_string(),
            info,
        })
    }
}
