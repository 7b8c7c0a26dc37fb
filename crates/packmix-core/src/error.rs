//! Error types for packmix.

use thiserror::Error;

use crate::types::{PackId, PlayerId, SoundId};

/// Result type alias using packmix's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for packmix.
#[derive(Error, Debug)]
pub enum Error {
    // Pack errors
    #[error("Malformed pack: {0}")]
    MalformedPack(#[from] FormatError),

    #[error("Pack {0} is already loaded")]
    DuplicatePack(PackId),

    #[error("Pack id {id} is out of range (max {max})")]
    InvalidPackId { id: i64, max: usize },

    #[error("Pack {0} is not loaded")]
    UnknownPack(PackId),

    #[error("Sound {sound} not found in pack {pack}")]
    UnknownSound { pack: PackId, sound: SoundId },

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    // Audio errors
    #[error("Audio decode error: {0}")]
    AudioDecode(String),

    #[error("Resample error: {0}")]
    Resample(String),

    // Engine errors
    #[error("Command queue is full")]
    QueueFull,

    #[error("Player limit of {0} reached")]
    PlayerLimit(usize),

    #[error("Player {0} does not exist")]
    UnknownPlayer(PlayerId),

    #[error("Operation not allowed in state {0}")]
    InvalidState(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons a pack container fails validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("source is {len} bytes, shorter than the {needed} byte header")]
    Truncated { len: usize, needed: usize },

    #[error("bad magic {0:?}")]
    BadMagic([u8; 4]),

    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),

    #[error("entry table for {count} entries runs past the end of the source")]
    TableOutOfRange { count: u32 },

    #[error("entry {sound} spans {offset}+{length}, payload is {payload} bytes")]
    EntryOutOfRange {
        sound: SoundId,
        offset: u32,
        length: u32,
        payload: u64,
    },

    #[error("sound id {0} appears more than once")]
    DuplicateSound(SoundId),

    #[error("entry {sound} has unknown sample format {code}")]
    UnknownFormat { sound: SoundId, code: u8 },

    #[error("entry {sound} has unsupported channel count {channels}")]
    UnsupportedChannels { sound: SoundId, channels: u8 },

    #[error("entry {0} has a zero sample rate")]
    ZeroSampleRate(SoundId),

    #[error("entry {sound} length {length} is not a whole number of frames")]
    PartialFrame { sound: SoundId, length: u32 },
}

impl Error {
    /// Returns true for errors caused by the pack source itself rather than engine state.
    pub const fn is_resource_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedPack(_)
                | Self::DuplicatePack(_)
                | Self::InvalidPackId { .. }
                | Self::AssetNotFound(_)
                | Self::AudioDecode(_)
                | Self::Resample(_)
                | Self::Io(_)
        )
    }

    /// Returns true if retrying the same call later may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::QueueFull.is_retryable());
        assert!(!Error::PlayerLimit(4).is_retryable());
        assert!(!Error::DuplicatePack(PackId::new(1)).is_retryable());
    }

    #[test]
    fn test_resource_errors() {
        assert!(Error::from(FormatError::BadMagic(*b"RIFF")).is_resource_error());
        assert!(Error::DuplicatePack(PackId::new(0)).is_resource_error());
        assert!(!Error::QueueFull.is_resource_error());
    }

    #[test]
    fn test_error_display() {
        let err = Error::UnknownSound {
            pack: PackId::new(2),
            sound: SoundId::new(7),
        };
        assert_eq!(err.to_string(), "Sound 7 not found in pack 2");
    }
}
