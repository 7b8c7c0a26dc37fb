#![allow(dead_code)]
#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::time::{Duration, Instant};

use packmix_audio::{CaptureSink, Engine, EngineEvent, PackSource};
use packmix_core::{EngineConfig, PackBuilder};

/// Mono, four frames per block, small rings.
pub fn mono_config() -> EngineConfig {
    EngineConfig {
        channels: 1,
        block_frames: 4,
        max_packs: 4,
        max_voices: 8,
        max_players: 2,
        stream_ring_frames: 32,
        stream_low_watermark_frames: 8,
        decode_idle_ms: 1,
        ..EngineConfig::default()
    }
}

pub fn engine(config: EngineConfig) -> (Engine, CaptureSink) {
    let capture = CaptureSink::new();
    let engine = Engine::new(config, Box::new(capture.handle())).unwrap();
    (engine, capture)
}

/// A pack with one mono f32 sound per `(id, samples)` pair.
pub fn memory_pack(sounds: &[(u32, Vec<f32>)]) -> PackSource {
    let mut builder = PackBuilder::new();
    for (id, samples) in sounds {
        builder = builder.pcm_f32(*id, 1, 48_000, samples);
    }
    PackSource::Memory(builder.build())
}

pub fn drain_events(engine: &Engine) -> Vec<EngineEvent> {
    engine.events().try_iter().collect()
}

/// Poll `condition` until it holds or five seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(5) {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

pub fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() < 1e-6, "sample {i}: {a} != {e}");
    }
}

/// 16-bit PCM WAV file bytes.
pub fn wav_s16(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
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
