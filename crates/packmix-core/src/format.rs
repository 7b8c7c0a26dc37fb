//! Resource pack container format.
//!
//! A pack is a fixed 16 byte header, a table of 24 byte entries and a payload
//! region. Entry offsets are relative to the start of the payload, which sits
//! directly after the table. All integers are little-endian.
//!
//! ```text
//! header   magic "PMXP" | version u16 | flags u16 | entry_count u32 | reserved u32
//! entry    sound_id u32 | offset u32 | length u32 | format u8 | channels u8
//!          | reserved u16 | sample_rate u32 | reserved u32
//! ```

use std::collections::HashSet;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FormatError;
use crate::types::{SampleFormat, SoundId};

/// Leading bytes of every pack.
pub const MAGIC: [u8; 4] = *b"PMXP";
/// The only container version this crate reads and writes.
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 16;
pub const ENTRY_LEN: usize = 24;

/// Decoded pack header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackHeader {
    pub version: u16,
    pub flags: u16,
    pub entry_count: u32,
}

impl PackHeader {
    /// Length in bytes of the entry table that follows the header.
    pub const fn table_len(&self) -> u64 {
        self.entry_count as u64 * ENTRY_LEN as u64
    }

    /// Absolute offset of the payload region.
    pub const fn payload_offset(&self) -> u64 {
        HEADER_LEN as u64 + self.table_len()
    }

    /// Parse and validate the fixed header.
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_LEN {
            return Err(FormatError::Truncated {
                len: bytes.len(),
                needed: HEADER_LEN,
            });
        }

        let mut buf = &bytes[..HEADER_LEN];
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(FormatError::BadMagic(magic));
        }

        let version = buf.get_u16_le();
        if version != VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let flags = buf.get_u16_le();
        let entry_count = buf.get_u32_le();

        Ok(Self {
            version,
            flags,
            entry_count,
        })
    }
}

/// One sound stored in a pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundEntry {
    pub sound_id: SoundId,
    /// Offset relative to the payload start.
    pub offset: u32,
    pub length: u32,
    pub format: SampleFormat,
    pub channels: u8,
    /// Ignored for encoded entries, whose rate comes from the stream itself.
    pub sample_rate: u32,
}

impl SoundEntry {
    /// Bytes per interleaved frame for PCM entries.
    pub fn frame_bytes(&self) -> Option<usize> {
        self.format
            .bytes_per_sample()
            .map(|bps| bps * usize::from(self.channels))
    }

    /// Number of frames for PCM entries.
    pub fn pcm_frames(&self) -> Option<usize> {
        self.frame_bytes()
            .map(|frame| self.length as usize / frame)
    }

    /// Byte range of this entry within the whole source.
    pub const fn absolute_range(&self, payload_offset: u64) -> (u64, u64) {
        let start = payload_offset + self.offset as u64;
        (start, start + self.length as u64)
    }

    fn decode(mut buf: &[u8]) -> Result<Self, FormatError> {
        let sound_id = SoundId::new(buf.get_u32_le());
        let offset = buf.get_u32_le();
        let length = buf.get_u32_le();
        let code = buf.get_u8();
        let channels = buf.get_u8();
        let _reserved = buf.get_u16_le();
        let sample_rate = buf.get_u32_le();

        let format = SampleFormat::from_code(code).ok_or(FormatError::UnknownFormat {
            sound: sound_id,
            code,
        })?;
        if !matches!(channels, 1 | 2) {
            return Err(FormatError::UnsupportedChannels {
                sound: sound_id,
                channels,
            });
        }
        if format.is_pcm() && sample_rate == 0 {
            return Err(FormatError::ZeroSampleRate(sound_id));
        }

        Ok(Self {
            sound_id,
            offset,
            length,
            format,
            channels,
            sample_rate,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.sound_id.0);
        buf.put_u32_le(self.offset);
        buf.put_u32_le(self.length);
        buf.put_u8(self.format.code());
        buf.put_u8(self.channels);
        buf.put_u16_le(0);
        buf.put_u32_le(self.sample_rate);
        buf.put_u32_le(0);
    }
}

/// Validated entry table of a pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackTable {
    pub header: PackHeader,
    pub entries: Vec<SoundEntry>,
    /// Total bytes available after the payload offset.
    pub payload_len: u64,
}

impl PackTable {
    /// Parse the entry table of a source whose total size is `source_len`.
    ///
    /// `table` must hold at least `header.table_len()` bytes.
    pub fn parse_entries(
        header: PackHeader,
        table: &[u8],
        source_len: u64,
    ) -> Result<Self, FormatError> {
        let payload_offset = header.payload_offset();
        if payload_offset > source_len || (table.len() as u64) < header.table_len() {
            return Err(FormatError::TableOutOfRange {
                count: header.entry_count,
            });
        }
        let payload_len = source_len - payload_offset;

        let mut entries = Vec::with_capacity(header.entry_count as usize);
        let mut seen = HashSet::with_capacity(header.entry_count as usize);

        for raw in table.chunks_exact(ENTRY_LEN).take(header.entry_count as usize) {
            let entry = SoundEntry::decode(raw)?;

            let end = u64::from(entry.offset) + u64::from(entry.length);
            if end > payload_len {
                return Err(FormatError::EntryOutOfRange {
                    sound: entry.sound_id,
                    offset: entry.offset,
                    length: entry.length,
                    payload: payload_len,
                });
            }
            if let Some(frame) = entry.frame_bytes() {
                if entry.length as usize % frame != 0 {
                    return Err(FormatError::PartialFrame {
                        sound: entry.sound_id,
                        length: entry.length,
                    });
                }
            }
            if !seen.insert(entry.sound_id) {
                return Err(FormatError::DuplicateSound(entry.sound_id));
            }

            entries.push(entry);
        }

        Ok(Self {
            header,
            entries,
            payload_len,
        })
    }

    /// Parse a pack held entirely in memory.
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        let header = PackHeader::parse(bytes)?;
        let table_end = usize::try_from(header.payload_offset())
            .ok()
            .filter(|&end| end <= bytes.len())
            .ok_or(FormatError::TableOutOfRange {
                count: header.entry_count,
            })?;
        Self::parse_entries(header, &bytes[HEADER_LEN..table_end], bytes.len() as u64)
    }

    pub const fn payload_offset(&self) -> u64 {
        self.header.payload_offset()
    }

    /// Look up an entry by its local sound id.
    pub fn find(&self, sound: SoundId) -> Option<(usize, &SoundEntry)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.sound_id == sound)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Writes packs in the container layout.
///
/// Used by tooling, tests and the demo binary.
#[derive(Debug, Default)]
pub struct PackBuilder {
    entries: Vec<SoundEntry>,
    payload: BytesMut,
}

impl PackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append interleaved signed 16-bit samples.
    #[must_use]
    pub fn pcm_s16(mut self, sound: u32, channels: u8, sample_rate: u32, samples: &[i16]) -> Self {
        let offset = self.payload.len();
        for &s in samples {
            self.payload.put_i16_le(s);
        }
        self.push(sound, offset, SampleFormat::PcmS16, channels, sample_rate);
        self
    }

    /// Append interleaved 32-bit float samples.
    #[must_use]
    pub fn pcm_f32(mut self, sound: u32, channels: u8, sample_rate: u32, samples: &[f32]) -> Self {
        let offset = self.payload.len();
        for &s in samples {
            self.payload.put_f32_le(s);
        }
        self.push(sound, offset, SampleFormat::PcmF32, channels, sample_rate);
        self
    }

    /// Append an encoded container (WAV, FLAC, Ogg, ...) verbatim.
    #[must_use]
    pub fn encoded(mut self, sound: u32, channels: u8, data: &[u8]) -> Self {
        let offset = self.payload.len();
        self.payload.put_slice(data);
        self.push(sound, offset, SampleFormat::Encoded, channels, 0);
        self
    }

    fn push(
        &mut self,
        sound: u32,
        offset: usize,
        format: SampleFormat,
        channels: u8,
        sample_rate: u32,
    ) {
        #[allow(clippy::cast_possible_truncation)]
        self.entries.push(SoundEntry {
            sound_id: SoundId::new(sound),
            offset: offset as u32,
            length: (self.payload.len() - offset) as u32,
            format,
            channels,
            sample_rate,
        });
    }

    /// Serialize header, table and payload.
    pub fn build(self) -> Bytes {
        let mut out =
            BytesMut::with_capacity(HEADER_LEN + ENTRY_LEN * self.entries.len() + self.payload.len());
        out.put_slice(&MAGIC);
        out.put_u16_le(VERSION);
        out.put_u16_le(0);
        #[allow(clippy::cast_possible_truncation)]
        out.put_u32_le(self.entries.len() as u32);
        out.put_u32_le(0);
        for entry in &self.entries {
            entry.encode(&mut out);
        }
        out.put_slice(&self.payload);
        out.freeze()
    }
}
