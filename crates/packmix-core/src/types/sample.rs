//! Sample encodings carried by pack entries.

use serde::{Deserialize, Serialize};

/// Encoding of an entry's payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Interleaved signed 16-bit little-endian PCM.
    PcmS16,
    /// Interleaved 32-bit float little-endian PCM.
    PcmF32,
    /// A self-describing container (WAV, FLAC, Ogg Vorbis, ...) decoded by probing.
    Encoded,
}

impl SampleFormat {
    /// Parse the on-disk format code.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::PcmS16),
            1 => Some(Self::PcmF32),
            2 => Some(Self::Encoded),
            _ => None,
        }
    }

    /// On-disk format code.
    pub const fn code(self) -> u8 {
        match self {
            Self::PcmS16 => 0,
            Self::PcmF32 => 1,
            Self::Encoded => 2,
        }
    }

    /// Bytes per sample for raw PCM, `None` for encoded payloads.
    pub const fn bytes_per_sample(self) -> Option<usize> {
        match self {
            Self::PcmS16 => Some(2),
            Self::PcmF32 => Some(4),
            Self::Encoded => None,
        }
    }

    pub const fn is_pcm(self) -> bool {
        !matches!(self, Self::Encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_codes() {
        for format in [SampleFormat::PcmS16, SampleFormat::PcmF32, SampleFormat::Encoded] {
            assert_eq!(SampleFormat::from_code(format.code()), Some(format));
        }
        assert_eq!(SampleFormat::from_code(9), None);
    }

    #[test]
    fn test_bytes_per_sample() {
        assert_eq!(SampleFormat::PcmS16.bytes_per_sample(), Some(2));
        assert_eq!(SampleFormat::Encoded.bytes_per_sample(), None);
    }
}
