//! Entry decoding: raw PCM and symphonia-probed containers.

use std::io::{Cursor, Read};

use bytes::Bytes;
use packmix_core::{Error, Result, SampleFormat, SoundEntry};
use symphonia::core::{
    audio::AudioBufferRef,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    formats::{FormatOptions, FormatReader},
    io::{MediaSource, MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, warn};

use crate::source::EntryReader;

/// Frames produced per `decode_next` call for raw PCM entries.
const PCM_CHUNK_FRAMES: usize = 1024;

/// Container decoder wrapping symphonia.
pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    /// First decoded packet, read up front to learn the channel layout.
    primed: Option<Vec<f32>>,
}

impl AudioDecoder {
    /// Probe `source` and open its first audio track.
    pub fn new(source: Box<dyn MediaSource>, extension_hint: Option<&str>) -> Result<Self> {
        let mss = MediaSourceStream::new(source, MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension_hint {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::AudioDecode(format!("Failed to probe format: {e}")))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::AudioDecode("No audio tracks found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::AudioDecode("Track has no sample rate".to_string()))?;
        let declared = track
            .codec_params
            .channels
            .and_then(|c| u16::try_from(c.count()).ok());

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::AudioDecode(format!("Failed to create decoder: {e}")))?;

        let mut audio = Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels: declared.unwrap_or(0),
            primed: None,
        };

        // The decoded buffer's spec is authoritative; some formats only know
        // their layout once a packet has been decoded.
        match audio.next_buffer()? {
            Some((channels, samples)) => {
                if declared.is_some_and(|d| d != channels) {
                    warn!(
                        "Track declares {:?} channels but decodes {}",
                        declared, channels
                    );
                }
                audio.channels = channels;
                audio.primed = Some(samples);
            }
            None if audio.channels == 0 => {
                return Err(Error::AudioDecode(
                    "Track has no channel layout and no audio".to_string(),
                ));
            }
            None => {}
        }

        debug!(
            "Audio track: id={}, sample_rate={}, channels={}",
            track_id, sample_rate, audio.channels
        );
        Ok(audio)
    }

    /// Open an in-memory container.
    pub fn from_bytes(data: Bytes, extension_hint: Option<&str>) -> Result<Self> {
        Self::new(Box::new(Cursor::new(data)), extension_hint)
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Decode the next packet into interleaved f32 samples. `None` at end of stream.
    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>> {
        if let Some(samples) = self.primed.take() {
            return Ok(Some(samples));
        }
        Ok(self.next_buffer()?.map(|(_, samples)| samples))
    }

    /// Next decoded packet with its channel count.
    fn next_buffer(&mut self) -> Result<Option<(u16, Vec<f32>)>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(symphonia::core::errors::Error::ResetRequired) => return Ok(None),
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Failed to read packet: {e}")));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let channels = u16::try_from(decoded.spec().channels.count())
                        .map_err(|_| Error::AudioDecode("Too many channels".to_string()))?;
                    return Ok(Some((channels, audio_buffer_to_f32(&decoded))));
                }
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    warn!("Decode error (skipping packet): {e}");
                }
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Decode failed: {e}")));
                }
            }
        }
    }
}

/// Convert a symphonia buffer to interleaved f32 samples.
fn audio_buffer_to_f32(buffer: &AudioBufferRef<'_>) -> Vec<f32> {
    match buffer {
        AudioBufferRef::F32(buf) => interleave(buf.planes().planes(), |s| s),
        #[allow(clippy::cast_possible_truncation)]
        AudioBufferRef::F64(buf) => interleave(buf.planes().planes(), |s| s as f32),
        #[allow(clippy::cast_precision_loss)]
        AudioBufferRef::S32(buf) => interleave(buf.planes().planes(), |s| s as f32 / 2_147_483_648.0),
        AudioBufferRef::S16(buf) => interleave(buf.planes().planes(), |s| f32::from(s) / 32768.0),
        AudioBufferRef::U8(buf) => {
            interleave(buf.planes().planes(), |s| (f32::from(s) - 128.0) / 128.0)
        }
        _ => Vec::new(),
    }
}

fn interleave<T: Copy>(planes: &[&[T]], convert: impl Fn(T) -> f32) -> Vec<f32> {
    let Some(first) = planes.first() else {
        return Vec::new();
    };

    let frames = first.len();
    let mut output = Vec::with_capacity(frames * planes.len());
    for frame in 0..frames {
        for plane in planes {
            output.push(convert(plane[frame]));
        }
    }
    output
}

/// Decoder for raw little-endian PCM entries.
pub struct PcmDecoder {
    reader: Box<dyn Read + Send + Sync>,
    format: SampleFormat,
    channels: u16,
    sample_rate: u32,
    remaining: u64,
    raw: Vec<u8>,
}

impl PcmDecoder {
    pub fn new(
        reader: Box<dyn Read + Send + Sync>,
        format: SampleFormat,
        channels: u16,
        sample_rate: u32,
        length: u64,
    ) -> Result<Self> {
        let Some(bytes_per_sample) = format.bytes_per_sample() else {
            return Err(Error::Internal(format!("{format:?} is not raw PCM")));
        };
        let frame_bytes = bytes_per_sample * usize::from(channels);

        Ok(Self {
            reader,
            format,
            channels,
            sample_rate,
            remaining: length,
            raw: vec![0u8; PCM_CHUNK_FRAMES * frame_bytes],
        })
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let want = usize::try_from(self.remaining).map_or(self.raw.len(), |r| r.min(self.raw.len()));
        let chunk = &mut self.raw[..want];
        self.reader.read_exact(chunk)?;
        self.remaining -= want as u64;

        let samples = match self.format {
            SampleFormat::PcmS16 => chunk
                .chunks_exact(2)
                .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
                .collect(),
            SampleFormat::PcmF32 => chunk
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .map(|s| if s.is_finite() { s } else { 0.0 })
                .collect(),
            SampleFormat::Encoded => Vec::new(),
        };
        Ok(Some(samples))
    }
}

/// Decoder for one pack entry, whatever its encoding.
pub enum EntryDecoder {
    Pcm(PcmDecoder),
    Container(AudioDecoder),
}

impl EntryDecoder {
    /// Open a decoder over the entry's byte window.
    pub fn open(reader: EntryReader, entry: &SoundEntry) -> Result<Self> {
        if entry.format.is_pcm() {
            let length = reader.len();
            Ok(Self::Pcm(PcmDecoder::new(
                Box::new(reader),
                entry.format,
                u16::from(entry.channels),
                entry.sample_rate,
                length,
            )?))
        } else {
            Ok(Self::Container(AudioDecoder::new(Box::new(reader), None)?))
        }
    }

    pub const fn sample_rate(&self) -> u32 {
        match self {
            Self::Pcm(d) => d.sample_rate(),
            Self::Container(d) => d.sample_rate(),
        }
    }

    pub const fn channels(&self) -> u16 {
        match self {
            Self::Pcm(d) => d.channels(),
            Self::Container(d) => d.channels(),
        }
    }

    pub fn decode_next(&mut self) -> Result<Option<Vec<f32>>> {
        match self {
            Self::Pcm(d) => d.decode_next(),
            Self::Container(d) => d.decode_next(),
        }
    }

    /// Decode everything that is left.
    pub fn decode_all(&mut self) -> Result<Vec<f32>> {
        let mut samples = Vec::new();
        while let Some(chunk) = self.decode_next()? {
            samples.extend_from_slice(&chunk);
        }
        Ok(samples)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use packmix_core::SoundId;

    /// 16-bit PCM WAV file bytes.
    pub(crate) fn wav_s16(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn reader(data: Vec<u8>) -> EntryReader {
        let len = data.len() as u64;
        EntryReader::new(Box::new(Cursor::new(data)), 0, len).unwrap()
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_pcm_s16_decode() {
        let data: Vec<u8> = [0i16, 16384, -32768]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let entry = SoundEntry {
            sound_id: SoundId::new(0),
            offset: 0,
            length: 6,
            format: SampleFormat::PcmS16,
            channels: 1,
            sample_rate: 8000,
        };

        let mut decoder = EntryDecoder::open(reader(data), &entry).unwrap();
        assert_eq!(decoder.sample_rate(), 8000);
        assert_eq!(decoder.decode_all().unwrap(), vec![0.0, 0.5, -1.0]);
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_pcm_chunks_large_entries() {
        let samples: Vec<f32> = (0..3000u16).map(|i| f32::from(i) / 4096.0).collect();
        let data: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let entry = SoundEntry {
            sound_id: SoundId::new(1),
            offset: 0,
            length: u32::try_from(data.len()).unwrap(),
            format: SampleFormat::PcmF32,
            channels: 1,
            sample_rate: 48_000,
        };

        let mut decoder = EntryDecoder::open(reader(data), &entry).unwrap();
        let first = decoder.decode_next().unwrap().unwrap();
        assert_eq!(first.len(), PCM_CHUNK_FRAMES);
        let mut all = first;
        all.extend(decoder.decode_all().unwrap());
        assert_eq!(all, samples);
    }

    #[test]
    fn test_wav_container_decode() {
        let wav = wav_s16(22_050, 2, &[0, 0, 16384, -16384, 32767, -32768]);
        let mut decoder = AudioDecoder::from_bytes(Bytes::from(wav), Some("wav")).unwrap();
        assert_eq!(decoder.sample_rate(), 22_050);
        assert_eq!(decoder.channels(), 2);

        let mut samples = Vec::new();
        while let Some(chunk) = decoder.decode_next().unwrap() {
            samples.extend(chunk);
        }
        assert_eq!(samples.len(), 6);
        assert!((samples[2] - 0.5).abs() < 1e-4);
        assert!((samples[3] + 0.5).abs() < 1e-4);
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn test_channels_from_decoded_audio_keeps_first_packet() {
        let samples: Vec<i16> = (0..10_000).map(|i| (i % 3000) as i16).collect();
        let wav = wav_s16(48_000, 1, &samples);
        let mut decoder = AudioDecoder::from_bytes(Bytes::from(wav), None).unwrap();
        assert_eq!(decoder.channels(), 1);

        let mut decoded = Vec::new();
        while let Some(chunk) = decoder.decode_next().unwrap() {
            decoded.extend(chunk);
        }
        assert_eq!(decoded.len(), samples.len());
        for (got, want) in decoded.iter().zip(&samples) {
            assert!((got - f32::from(*want) / 32768.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_garbage_container_fails() {
        let result = AudioDecoder::from_bytes(Bytes::from_static(b"definitely not audio"), None);
        assert!(matches!(result, Err(Error::AudioDecode(_))));
    }
}
