//! Command-line companion for packmix: build packs, inspect them and render
//! sounds through the engine to a WAV file.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use packmix_audio::decode::AudioDecoder;
use packmix_audio::{CaptureSink, Engine, EngineEvent, PackSource, TickScheduler};
use packmix_core::{PackBuilder, PackId, PackTable, SoundId};
use packmix_host::{init_logging, HostConfig};
use tracing::{info, warn};

#[derive(clap::Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// Host config file (JSON). Defaults to the platform config location.
    #[clap(long, global = true)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    action: Action,
}

#[derive(clap::Subcommand, Debug)]
enum Action {
    /// Pack audio files into a resource pack. Sound ids are assigned from 1 in argument order.
    Build {
        output: PathBuf,
        inputs: Vec<PathBuf>,
        /// Decode to 32-bit float PCM instead of storing the encoded files.
        #[clap(long)]
        pcm: bool,
    },
    /// List the entries of a pack.
    Inspect { pack: PathBuf },
    /// Play sounds from a pack through the engine and write the mix to a WAV file.
    Render {
        pack: PathBuf,
        output: PathBuf,
        /// Sound ids to start together.
        #[clap(short, long = "sound", required = true)]
        sounds: Vec<u32>,
        #[clap(short, long, default_value = "1.0")]
        gain: f32,
        /// Stream the pack instead of decoding it up front.
        #[clap(long)]
        stream: bool,
        #[clap(long, default_value = "1000")]
        duration_ms: u64,
        /// Tick on the scheduler thread in real time instead of as fast as possible.
        #[clap(long)]
        realtime: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => HostConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HostConfig::load_or_default()?,
    };
    init_logging(&config.log_filter);

    match args.action {
        Action::Build {
            output,
            inputs,
            pcm,
        } => build(&output, &inputs, pcm),
        Action::Inspect { pack } => inspect(&pack),
        Action::Render {
            pack,
            output,
            sounds,
            gain,
            stream,
            duration_ms,
            realtime,
        } => render(
            &config,
            &RenderJob {
                pack,
                output,
                sounds,
                gain,
                stream,
                duration: Duration::from_millis(duration_ms),
                realtime,
            },
        ),
    }
}

fn build(output: &Path, inputs: &[PathBuf], pcm: bool) -> Result<()> {
    if inputs.is_empty() {
        bail!("No input files");
    }
    let mut builder = PackBuilder::new();
    for (sound, input) in (1u32..).zip(inputs) {
        let data = std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
        let extension = input.extension().and_then(|e| e.to_str());
        let mut decoder = AudioDecoder::from_bytes(data.clone().into(), extension)
            .with_context(|| format!("Unsupported audio file {}", input.display()))?;
        let channels = u8::try_from(decoder.channels())
            .ok()
            .filter(|c| matches!(*c, 1 | 2))
            .with_context(|| format!("{} has {} channels", input.display(), decoder.channels()))?;

        builder = if pcm {
            let mut samples = Vec::new();
            while let Some(chunk) = decoder.decode_next()? {
                samples.extend(chunk);
            }
            builder.pcm_f32(sound, channels, decoder.sample_rate(), &samples)
        } else {
            builder.encoded(sound, channels, &data)
        };
        info!("Sound {} <- {}", sound, input.display());
    }

    let bytes = builder.build();
    std::fs::write(output, &bytes).with_context(|| format!("Failed to write {}", output.display()))?;
    println!("{}: {} sounds, {} bytes", output.display(), inputs.len(), bytes.len());
    Ok(())
}

fn inspect(pack: &Path) -> Result<()> {
    let bytes = std::fs::read(pack).with_context(|| format!("Failed to read {}", pack.display()))?;
    let table = PackTable::parse(&bytes).context("Malformed pack")?;

    println!(
        "{}: version {}, {} entries, payload {} bytes",
        pack.display(),
        table.header.version,
        table.len(),
        table.payload_len
    );
    for entry in &table.entries {
        let frames = entry
            .pcm_frames()
            .map_or_else(|| "-".to_string(), |f| f.to_string());
        println!(
            "  {:>6}  {:?} {}ch {:>6} Hz  {:>10} bytes  {:>8} frames",
            entry.sound_id, entry.format, entry.channels, entry.sample_rate, entry.length, frames
        );
    }
    Ok(())
}

struct RenderJob {
    pack: PathBuf,
    output: PathBuf,
    sounds: Vec<u32>,
    gain: f32,
    stream: bool,
    duration: Duration,
    realtime: bool,
}

fn render(config: &HostConfig, job: &RenderJob) -> Result<()> {
    let capture = CaptureSink::new();
    let engine = Arc::new(Engine::new(config.engine.clone(), Box::new(capture.handle()))?);
    let pack = PackId::new(0);

    engine
        .load(pack, PackSource::file(&job.pack), job.stream)
        .with_context(|| format!("Failed to load {}", job.pack.display()))?;
    for &sound in &job.sounds {
        engine.play(pack, SoundId::new(sound), job.gain)?;
    }

    if job.realtime {
        let scheduler = TickScheduler::spawn(Arc::clone(&engine), config.tick_period())?;
        std::thread::sleep(job.duration);
        let summary = scheduler.stop()?;
        info!("Rendered {} ticks in real time", summary.ticks);
    } else {
        let frames = job.duration.as_millis() * u128::from(config.engine.sample_rate) / 1000;
        let ticks = frames.div_ceil(config.engine.block_frames as u128);
        for _ in 0..ticks {
            engine.tick();
        }
    }

    for event in engine.events().try_iter() {
        if let EngineEvent::PlayDropped { sound, reason, .. } = event {
            warn!("Sound {} was dropped: {:?}", sound, reason);
        }
    }
    let stats = engine.stats();
    engine.terminate();

    let samples = capture.take();
    write_wav(&job.output, config.engine.sample_rate, config.engine.channels, &samples)?;
    println!(
        "{}: {} frames, {} ticks, {} underrun ticks",
        job.output.display(),
        samples.len() / usize::from(config.engine.channels),
        stats.ticks,
        stats.underrun_ticks
    );
    Ok(())
}

fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[f32]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Creating {}", path.display()))?;
    let mut writer = hound::WavWriter::new(
        BufWriter::new(file),
        hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        },
    )
    .context("Creating WAV writer")?;

    for &sample in samples {
        writer.write_sample(sample).context("Writing sample")?;
    }
    writer.finalize().context("Finalizing the WAV file")?;
    Ok(())
}
