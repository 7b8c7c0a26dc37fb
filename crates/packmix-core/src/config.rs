//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// What a load does when the pack id is already taken.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePackPolicy {
    /// Fail the load and keep the existing pack.
    #[default]
    Reject,
    /// Install the new pack in place of the old one. Voices already playing
    /// the old pack finish on it.
    Replace,
}

/// What happens to a non-looping player that reaches the end of its sound.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlayerEndPolicy {
    /// Keep the voice allocated as finished until it is rewound or released.
    #[default]
    Hold,
    /// Free the voice and forget the player.
    Release,
}

/// Tunables for one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count (1 or 2).
    pub channels: u16,
    /// Frames mixed per tick.
    pub block_frames: usize,
    pub max_packs: usize,
    pub max_voices: usize,
    /// Persistent players, a subset of `max_voices`.
    pub max_players: usize,
    pub command_capacity: usize,
    pub event_capacity: usize,
    /// Per-voice stream ring size in frames.
    pub stream_ring_frames: usize,
    /// Fill level below which the mixer asks the decoder to refill.
    pub stream_low_watermark_frames: usize,
    /// How long the decode worker sleeps when it has nothing to do.
    pub decode_idle_ms: u64,
    pub duplicate_pack_policy: DuplicatePackPolicy,
    pub player_end_policy: PlayerEndPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            block_frames: 48,
            max_packs: 8,
            max_voices: 64,
            max_players: 4,
            command_capacity: 256,
            event_capacity: 256,
            stream_ring_frames: 16_384,
            stream_low_watermark_frames: 4_096,
            decode_idle_ms: 5,
            duplicate_pack_policy: DuplicatePackPolicy::Reject,
            player_end_policy: PlayerEndPolicy::Hold,
        }
    }
}

impl EngineConfig {
    /// Check that the values can be used to build an engine.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::Config(msg.to_string()));

        if self.sample_rate == 0 {
            return fail("sample_rate must be positive");
        }
        if !matches!(self.channels, 1 | 2) {
            return fail("channels must be 1 or 2");
        }
        if self.block_frames == 0 {
            return fail("block_frames must be positive");
        }
        if self.max_packs == 0 || self.max_packs > usize::from(u16::MAX) {
            return fail("max_packs must be between 1 and 65535");
        }
        if self.max_voices == 0 || self.max_voices > usize::from(u16::MAX) {
            return fail("max_voices must be between 1 and 65535");
        }
        if self.max_players > self.max_voices {
            return fail("max_players cannot exceed max_voices");
        }
        if self.command_capacity == 0 || self.event_capacity == 0 {
            return fail("queue capacities must be positive");
        }
        if self.stream_ring_frames < self.block_frames * 2 {
            return fail("stream_ring_frames must hold at least two blocks");
        }
        if self.stream_low_watermark_frames >= self.stream_ring_frames {
            return fail("stream_low_watermark_frames must be below stream_ring_frames");
        }
        Ok(())
    }

    /// Interleaved samples in one mixed block.
    pub fn block_samples(&self) -> usize {
        self.block_frames * usize::from(self.channels)
    }

    /// Interleaved samples in one stream ring.
    pub fn stream_ring_samples(&self) -> usize {
        self.stream_ring_frames * usize::from(self.channels)
    }

    /// Load a configuration from JSON text. Missing fields take defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_packs, 8);
        assert_eq!(config.max_voices, 64);
        assert_eq!(config.max_players, 4);
        assert_eq!(config.command_capacity, 256);
        assert_eq!(config.block_samples(), 96);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(
            r#"{ "sample_rate": 44100, "duplicate_pack_policy": "replace" }"#,
        )
        .unwrap();
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.duplicate_pack_policy, DuplicatePackPolicy::Replace);
        assert_eq!(config.player_end_policy, PlayerEndPolicy::Hold);
        assert_eq!(config.max_voices, 64);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let config = EngineConfig {
            channels: 6,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = EngineConfig {
            max_players: 100,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            stream_low_watermark_frames: 16_384,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            EngineConfig::from_json("{ not json"),
            Err(Error::Json(_))
        ));
    }
}
