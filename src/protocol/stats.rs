use serde::{Deserialize, Serialize};

/// Statistics pushed periodically by a node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub players: i32,
    pub playing_players: i32,
    pub uptime: u64,
    #[serde(default)]
    pub memory: Option<Memory>,
    #[serde(default)]
    pub cpu: Cpu,
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub cores: i32,
    /// Host load as a 0..1 fraction.
    pub system_load: f64,
    pub lavalink_load: f64,
}

/// Audio frame health over the last stats window.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    pub sent: i32,
    pub nulled: i32,
    pub deficit: i32,
}

impl NodeStats {
    /// Load-penalty score used to rank nodes for guild assignment.
    ///
    /// Combines queue depth, CPU pressure, and frame health. The constants
    /// match the reference balancer and must not be retuned independently.
    pub fn penalty(&self) -> f64 {
        let mut penalty = self.playing_players as f64;
        penalty += 1.05f64.powf(100.0 * self.cpu.system_load) * 10.0 - 10.0;

        if let Some(frames) = &self.frame_stats {
            if frames.nulled > 0 {
                let null_penalty =
                    1.03f64.powf(500.0 * frames.nulled as f64 / 3000.0) * 300.0 - 300.0;
                penalty += null_penalty * 2.0;
            }
            if frames.deficit > 0 {
                penalty += 1.03f64.powf(500.0 * frames.deficit as f64 / 3000.0) * 600.0 - 600.0;
            }
        }

        penalty
    }
}
