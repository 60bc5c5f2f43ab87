use serde::{Deserialize, Serialize};

use crate::common::{LinkError, LinkResult};

/// Merged audio-DSP configuration sent with the `filters` command.
/// Absent sections leave the node's current setting untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<Timescale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<Tremolo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<Vibrato>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<Distortion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_mix: Option<ChannelMix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_pass: Option<LowPass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_pass: Option<HighPass>,
}

/// Speed/pitch/rate multipliers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timescale {
    pub speed: f64,
    pub pitch: f64,
    pub rate: f64,
}

impl Default for Timescale {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
            rate: 1.0,
        }
    }
}

/// Rapidly oscillates the volume of a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tremolo {
    pub frequency: f64,
    pub depth: f64,
}

impl Default for Tremolo {
    fn default() -> Self {
        Self {
            frequency: 2.0,
            depth: 0.5,
        }
    }
}

/// Rapidly oscillates the pitch of a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vibrato {
    pub frequency: f64,
    pub depth: f64,
}

impl Default for Vibrato {
    fn default() -> Self {
        Self {
            frequency: 2.0,
            depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rotation {
    pub speed: f64,
}

impl Default for Rotation {
    fn default() -> Self {
        Self { speed: 1.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Distortion {
    pub sin_offset: f64,
    pub sin_scale: f64,
    pub cos_offset: f64,
    pub cos_scale: f64,
    pub tan_offset: f64,
    pub tan_scale: f64,
    pub offset: f64,
    pub scale: f64,
}

impl Default for Distortion {
    fn default() -> Self {
        Self {
            sin_offset: 0.0,
            sin_scale: 1.0,
            cos_offset: 0.0,
            cos_scale: 1.0,
            tan_offset: 0.0,
            tan_scale: 1.0,
            offset: 0.0,
            scale: 1.0,
        }
    }
}

/// Mixes the stereo channels of a track into each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMix {
    pub left_to_left: f64,
    pub left_to_right: f64,
    pub right_to_left: f64,
    pub right_to_right: f64,
}

impl Default for ChannelMix {
    fn default() -> Self {
        Self {
            left_to_left: 1.0,
            left_to_right: 0.0,
            right_to_left: 0.0,
            right_to_right: 1.0,
        }
    }
}

impl ChannelMix {
    pub fn mono() -> Self {
        Self {
            left_to_left: 0.5,
            left_to_right: 0.5,
            right_to_left: 0.5,
            right_to_right: 0.5,
        }
    }

    pub fn only_left() -> Self {
        Self {
            left_to_left: 1.0,
            left_to_right: 0.0,
            right_to_left: 0.0,
            right_to_right: 0.0,
        }
    }

    pub fn only_right() -> Self {
        Self {
            left_to_left: 0.0,
            left_to_right: 0.0,
            right_to_left: 1.0,
            right_to_right: 1.0,
        }
    }

    /// Play both source channels through the left output only.
    pub fn full_left() -> Self {
        Self {
            left_to_left: 1.0,
            left_to_right: 0.0,
            right_to_left: 1.0,
            right_to_right: 0.0,
        }
    }

    /// Play both source channels through the right output only.
    pub fn full_right() -> Self {
        Self {
            left_to_left: 0.0,
            left_to_right: 1.0,
            right_to_left: 0.0,
            right_to_right: 1.0,
        }
    }

    /// Swap the playback channels.
    pub fn inverted() -> Self {
        Self {
            left_to_left: 0.0,
            left_to_right: 1.0,
            right_to_left: 1.0,
            right_to_right: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowPass {
    pub smoothing: f64,
}

impl Default for LowPass {
    fn default() -> Self {
        Self { smoothing: 100.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighPass {
    pub smoothing: f64,
}

impl Default for HighPass {
    fn default() -> Self {
        Self { smoothing: 100.0 }
    }
}

/// One equalizer band in the wire payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EqBand {
    pub band: u8,
    pub gain: f32,
}

/// Fixed 15-band equalizer. Gains are constrained to [-0.25, 1.0], where
/// -0.25 mutes the band and 0.25 doubles it.
#[derive(Debug, Clone, PartialEq)]
pub struct Equalizer {
    gains: [f32; Self::BANDS],
}

impl Default for Equalizer {
    fn default() -> Self {
        Self::flat()
    }
}

impl Equalizer {
    pub const BANDS: usize = 15;
    pub const MIN_GAIN: f32 = -0.25;
    pub const MAX_GAIN: f32 = 1.0;

    pub fn flat() -> Self {
        Self {
            gains: [0.0; Self::BANDS],
        }
    }

    /// Build from an explicit gain list, validating count and range.
    pub fn from_gains(gains: [f32; Self::BANDS]) -> LinkResult<Self> {
        for (band, gain) in gains.iter().enumerate() {
            if !(Self::MIN_GAIN..=Self::MAX_GAIN).contains(gain) {
                return Err(LinkError::InvalidFilter(format!(
                    "band {band} gain {gain} outside [{}, {}]",
                    Self::MIN_GAIN,
                    Self::MAX_GAIN
                )));
            }
        }
        Ok(Self { gains })
    }

    pub fn set(&mut self, band: usize, gain: f32) -> LinkResult<()> {
        if band >= Self::BANDS {
            return Err(LinkError::InvalidFilter(format!(
                "band {band} out of range (0..{})",
                Self::BANDS
            )));
        }
        if !(Self::MIN_GAIN..=Self::MAX_GAIN).contains(&gain) {
            return Err(LinkError::InvalidFilter(format!(
                "gain {gain} outside [{}, {}]",
                Self::MIN_GAIN,
                Self::MAX_GAIN
            )));
        }
        self.gains[band] = gain;
        Ok(())
    }

    pub fn gain(&self, band: usize) -> Option<f32> {
        self.gains.get(band).copied()
    }

    /// Wire payload: one `{band, gain}` object per band, in order.
    pub fn bands(&self) -> Vec<EqBand> {
        self.gains
            .iter()
            .enumerate()
            .map(|(band, gain)| EqBand {
                band: band as u8,
                gain: *gain,
            })
            .collect()
    }

    pub fn boosted() -> Self {
        Self {
            gains: [
                -0.075, 0.125, 0.125, 0.1, 0.1, 0.05, 0.075, 0.0, 0.0, 0.0, 0.0, 0.0, 0.125,
                0.15, 0.05,
            ],
        }
    }

    pub fn bass_boosted() -> Self {
        Self {
            gains: [
                0.125, 0.25, -0.25, -0.125, 0.0, -0.0125, -0.025, -0.0175, 0.0, 0.0, 0.0125,
                0.025, 0.375, 0.125, 0.125,
            ],
        }
    }

    pub fn piano() -> Self {
        Self {
            gains: [
                -0.25, -0.25, -0.25, -0.125, 0.0, 0.25, 0.25, 0.0, -0.25, -0.25, 0.0, 0.0, 0.5,
                0.25, -0.025,
            ],
        }
    }

    pub fn metal() -> Self {
        Self {
            gains: [
                0.0, 0.1, 0.1, 0.15, 0.13, 0.1, 0.0, 0.125, 0.175, 0.175, 0.125, 0.125, 0.1,
                0.075, 0.0,
            ],
        }
    }

    pub fn treble_boosted() -> Self {
        let mut eq = Self::flat();
        eq.gains[10] = 0.6;
        eq.gains[11] = 0.6;
        eq.gains[12] = 0.6;
        eq.gains[13] = 0.65;
        eq
    }

    pub fn electronic() -> Self {
        Self {
            gains: [
                0.375, 0.35, 0.125, 0.0, 0.0, -0.125, -0.125, 0.0, 0.25, 0.125, 0.15, 0.2, 0.25,
                0.35, 0.4,
            ],
        }
    }

    pub fn classical() -> Self {
        Self {
            gains: [
                0.375, 0.35, 0.125, 0.0, 0.0, 0.125, 0.55, 0.05, 0.125, 0.25, 0.2, 0.25, 0.3,
                0.25, 0.3,
            ],
        }
    }

    pub fn rock() -> Self {
        Self {
            gains: [
                0.3, 0.25, 0.2, 0.1, 0.05, -0.05, -0.15, -0.2, -0.1, -0.05, 0.05, 0.1, 0.2, 0.25,
                0.3,
            ],
        }
    }

    /// Every band boosted, bass and treble most of all.
    pub fn full() -> Self {
        Self {
            gains: [
                0.625, 0.275, 0.2625, 0.25, 0.25, 0.2375, 0.225, 0.25, 0.25, 0.25, 0.2625, 0.275,
                0.625, 0.375, 0.375,
            ],
        }
    }
}
