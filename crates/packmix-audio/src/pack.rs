//! Resource pack loading.
//!
//! Non-streaming packs are fully decoded on the loading thread into buffers
//! already in the engine's sample rate and channel layout. Streaming packs keep
//! only their entry table and re-open the byte source for each voice.

use std::io::{Read, Seek, SeekFrom};

use packmix_core::format::HEADER_LEN;
use packmix_core::{
    EngineConfig, Error, FormatError, PackHeader, PackId, PackTable, Result, SoundEntry, SoundId,
};
use tracing::{debug, info};

use crate::convert::Converter;
use crate::decode::EntryDecoder;
use crate::source::{EntryReader, PackSource};

/// A decoded sound held in memory.
#[derive(Debug, Clone)]
pub struct ResidentSound {
    /// Interleaved at the engine channel count.
    samples: Vec<f32>,
    frames: usize,
}

impl ResidentSound {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub const fn frames(&self) -> usize {
        self.frames
    }
}

#[derive(Debug)]
enum PackSounds {
    /// Index-aligned with the entry table.
    Resident(Vec<ResidentSound>),
    Streaming,
}

/// A loaded resource pack.
#[derive(Debug)]
pub struct Pack {
    id: PackId,
    source: PackSource,
    table: PackTable,
    sounds: PackSounds,
}

impl Pack {
    /// Read, validate and (unless `streaming`) decode a pack.
    pub fn load(id: PackId, source: PackSource, streaming: bool, config: &EngineConfig) -> Result<Self> {
        let table = read_table(&source)?;
        debug!(
            "Pack {} table: {} entries, payload {} bytes",
            id,
            table.len(),
            table.payload_len
        );

        let sounds = if streaming {
            PackSounds::Streaming
        } else {
            let mut resident = Vec::with_capacity(table.len());
            for entry in &table.entries {
                resident.push(decode_resident(&source, &table, entry, config)?);
            }
            PackSounds::Resident(resident)
        };

        info!(
            "Loaded pack {} ({:?}, {} sounds, {})",
            id,
            source,
            table.len(),
            if streaming { "streaming" } else { "resident" }
        );

        Ok(Self {
            id,
            source,
            table,
            sounds,
        })
    }

    pub const fn id(&self) -> PackId {
        self.id
    }

    pub const fn is_streaming(&self) -> bool {
        matches!(self.sounds, PackSounds::Streaming)
    }

    pub const fn table(&self) -> &PackTable {
        &self.table
    }

    pub const fn source(&self) -> &PackSource {
        &self.source
    }

    /// Index of the entry holding `sound`.
    pub fn entry_index(&self, sound: SoundId) -> Option<usize> {
        self.table.find(sound).map(|(index, _)| index)
    }

    pub fn entry(&self, index: usize) -> Option<&SoundEntry> {
        self.table.entries.get(index)
    }

    /// Decoded buffer of a non-streaming entry.
    pub fn resident(&self, index: usize) -> Option<&ResidentSound> {
        match &self.sounds {
            PackSounds::Resident(sounds) => sounds.get(index),
            PackSounds::Streaming => None,
        }
    }

    /// Open a fresh decoder over an entry's bytes.
    pub fn open_entry(&self, index: usize) -> Result<EntryDecoder> {
        let entry = self
            .entry(index)
            .ok_or_else(|| Error::Internal(format!("pack {} has no entry {index}", self.id)))?;
        open_entry(&self.source, &self.table, entry)
    }
}

fn read_table(source: &PackSource) -> Result<PackTable> {
    let mut reader = source.open()?;
    let source_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut header_bytes = [0u8; HEADER_LEN];
    let available = usize::try_from(source_len).map_or(HEADER_LEN, |len| len.min(HEADER_LEN));
    reader.read_exact(&mut header_bytes[..available])?;
    let header = PackHeader::parse(&header_bytes[..available])?;

    if header.payload_offset() > source_len {
        return Err(FormatError::TableOutOfRange {
            count: header.entry_count,
        }
        .into());
    }

    let table_len = usize::try_from(header.table_len())
        .map_err(|_| Error::from(FormatError::TableOutOfRange { count: header.entry_count }))?;
    let mut table_bytes = vec![0u8; table_len];
    reader.read_exact(&mut table_bytes)?;

    Ok(PackTable::parse_entries(header, &table_bytes, source_len)?)
}

fn open_entry(source: &PackSource, table: &PackTable, entry: &SoundEntry) -> Result<EntryDecoder> {
    let (start, _) = entry.absolute_range(table.payload_offset());
    let reader = EntryReader::new(source.open()?, start, u64::from(entry.length))?;
    EntryDecoder::open(reader, entry)
}

fn decode_resident(
    source: &PackSource,
    table: &PackTable,
    entry: &SoundEntry,
    config: &EngineConfig,
) -> Result<ResidentSound> {
    let mut decoder = open_entry(source, table, entry)?;
    let decoded = decoder.decode_all()?;
    let converter = Converter::new(
        decoder.sample_rate(),
        usize::from(decoder.channels()),
        config.sample_rate,
        usize::from(config.channels),
    )?;
    let samples = converter.convert_all(&decoded)?;
    let frames = samples.len() / usize::from(config.channels);

    debug!(
        "Decoded sound {}: {} frames at {}Hz -> {} frames",
        entry.sound_id,
        decoded.len() / usize::from(decoder.channels().max(1)),
        decoder.sample_rate(),
        frames
    );

    Ok(ResidentSound { samples, frames })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::decode::tests::wav_s16;
    use bytes::Bytes;
    use packmix_core::PackBuilder;

    fn config() -> EngineConfig {
        EngineConfig {
            sample_rate: 48_000,
            channels: 2,
            ..EngineConfig::default()
        }
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_resident_pack_is_converted_to_output_layout() {
        let bytes = PackBuilder::new()
            .pcm_s16(4, 1, 48_000, &[16384, -16384])
            .pcm_f32(7, 2, 48_000, &[0.25, 0.75])
            .build();
        let pack = Pack::load(PackId::new(0), PackSource::Memory(bytes), false, &config()).unwrap();

        assert!(!pack.is_streaming());
        let index = pack.entry_index(SoundId::new(4)).unwrap();
        let sound = pack.resident(index).unwrap();
        assert_eq!(sound.frames(), 2);
        assert_eq!(sound.samples(), &[0.5, 0.5, -0.5, -0.5]);

        let stereo = pack.resident(pack.entry_index(SoundId::new(7)).unwrap()).unwrap();
        assert_eq!(stereo.samples(), &[0.25, 0.75]);
    }

    #[test]
    fn test_resident_pack_resamples() {
        let samples = vec![1000i16; 24_000];
        let bytes = PackBuilder::new().pcm_s16(0, 1, 24_000, &samples).build();
        let pack = Pack::load(PackId::new(1), PackSource::Memory(bytes), false, &config()).unwrap();
        assert_eq!(pack.resident(0).unwrap().frames(), 48_000);
    }

    #[test]
    fn test_encoded_entry() {
        let wav = wav_s16(48_000, 1, &[0, 8192, 16384, 8192]);
        let bytes = PackBuilder::new().encoded(2, 1, &wav).build();
        let pack = Pack::load(PackId::new(0), PackSource::Memory(bytes), false, &config()).unwrap();
        let sound = pack.resident(0).unwrap();
        assert_eq!(sound.frames(), 4);
        assert!((sound.samples()[4] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_streaming_pack_keeps_table_only() {
        let bytes = PackBuilder::new().pcm_s16(3, 1, 48_000, &[1, 2, 3]).build();
        let pack = Pack::load(PackId::new(2), PackSource::Memory(bytes), true, &config()).unwrap();
        assert!(pack.is_streaming());
        assert!(pack.resident(0).is_none());

        let mut decoder = pack.open_entry(0).unwrap();
        assert_eq!(decoder.decode_all().unwrap().len(), 3);
    }

    #[test]
    fn test_file_backed_pack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ui.pmx");
        std::fs::write(&path, PackBuilder::new().pcm_s16(0, 1, 48_000, &[5; 10]).build()).unwrap();

        let pack = Pack::load(PackId::new(0), PackSource::file(&path), false, &config()).unwrap();
        assert_eq!(pack.resident(0).unwrap().frames(), 10);
    }

    #[test]
    fn test_malformed_sources() {
        let short = Pack::load(
            PackId::new(0),
            PackSource::Memory(Bytes::from_static(b"PMX")),
            false,
            &config(),
        );
        assert!(matches!(
            short,
            Err(Error::MalformedPack(FormatError::Truncated { len: 3, .. }))
        ));

        let mut bytes = PackBuilder::new().pcm_s16(0, 1, 48_000, &[1]).build().to_vec();
        bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        let huge = Pack::load(PackId::new(0), PackSource::Memory(bytes.into()), true, &config());
        assert!(matches!(
            huge,
            Err(Error::MalformedPack(FormatError::TableOutOfRange { .. }))
        ));

        let bad_wav = PackBuilder::new().encoded(0, 2, b"garbage bytes").build();
        let result = Pack::load(PackId::new(0), PackSource::Memory(bad_wav), false, &config());
        assert!(matches!(result, Err(Error::AudioDecode(_))));
    }
}
