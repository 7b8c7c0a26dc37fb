//! Sample-rate conversion using rubato.

use packmix_core::{Error, Result};
use rubato::{FftFixedIn, Resampler as RubatoResampler};
use tracing::debug;

/// Requested input frames per rubato call. rubato may round it up.
const CHUNK_FRAMES: usize = 1024;

/// Interleaved-sample resampler. A pass-through when the rates match.
///
/// Output is aligned with the input: the filter delay is dropped from the
/// front, and `flush` pushes out the delayed tail so exactly
/// `input_frames * output_rate / input_rate` frames come out overall.
pub struct Resampler {
    inner: Option<FftFixedIn<f32>>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    chunk_frames: usize,
    /// Deinterleaved input waiting for a full chunk.
    pending: Vec<Vec<f32>>,
    /// Leading output frames still to drop.
    delay_frames: usize,
    input_frames: u64,
    output_frames: u64,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 || channels == 0 {
            return Err(Error::Resample(format!(
                "invalid resampler shape {input_rate}Hz -> {output_rate}Hz x{channels}"
            )));
        }

        let (inner, chunk_frames, delay_frames) = if input_rate == output_rate {
            (None, CHUNK_FRAMES, 0)
        } else {
            let resampler = FftFixedIn::new(
                input_rate as usize,
                output_rate as usize,
                CHUNK_FRAMES,
                2,
                channels,
            )
            .map_err(|e| Error::Resample(format!("Failed to create resampler: {e}")))?;

            let chunk_frames = resampler.input_frames_next();
            let delay = resampler.output_delay();
            debug!(
                "Resampler created: {}Hz -> {}Hz, {} channels, {} frames delay",
                input_rate, output_rate, channels, delay
            );
            (Some(resampler), chunk_frames, delay)
        };

        Ok(Self {
            inner,
            input_rate,
            output_rate,
            channels,
            chunk_frames,
            pending: vec![Vec::new(); channels],
            delay_frames,
            input_frames: 0,
            output_frames: 0,
        })
    }

    /// Feed interleaved samples and return whatever full chunks produced.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        if self.inner.is_none() {
            return Ok(input.to_vec());
        }

        self.deinterleave(input);

        let mut output = Vec::new();
        let chunk_frames = self.chunk_frames;
        while self.pending[0].len() >= chunk_frames {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|ch| ch.drain(..chunk_frames).collect())
                .collect();
            let resampled = self.run(&chunk)?;
            self.emit(&resampled, usize::MAX, &mut output);
        }
        Ok(output)
    }

    /// Push the buffered and delayed tail through, padded with silence, then
    /// start over as if newly created.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let mut output = Vec::new();
        if self.inner.is_none() {
            return Ok(output);
        }

        let expected = self.expected_output_frames();
        while self.output_frames < expected {
            let chunk_frames = self.chunk_frames;
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|ch| {
                    let mut data = std::mem::take(ch);
                    data.resize(chunk_frames, 0.0);
                    data
                })
                .collect();

            let resampled = self.run(&chunk)?;
            if resampled.first().map_or(0, Vec::len) == 0 {
                break;
            }
            #[allow(clippy::cast_possible_truncation)]
            let wanted = (expected - self.output_frames) as usize;
            self.emit(&resampled, wanted, &mut output);
        }

        self.reset();
        Ok(output)
    }

    pub fn reset(&mut self) {
        if let Some(inner) = &mut self.inner {
            inner.reset();
            self.delay_frames = inner.output_delay();
        }
        self.pending.iter_mut().for_each(Vec::clear);
        self.input_frames = 0;
        self.output_frames = 0;
    }

    fn expected_output_frames(&self) -> u64 {
        let scaled = u128::from(self.input_frames) * u128::from(self.output_rate);
        let rate = u128::from(self.input_rate);
        u64::try_from((scaled + rate / 2) / rate).unwrap_or(u64::MAX)
    }

    fn run(&mut self, chunk: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        let Some(inner) = &mut self.inner else {
            return Ok(chunk.to_vec());
        };
        inner
            .process(chunk, None)
            .map_err(|e| Error::Resample(format!("Resample failed: {e}")))
    }

    /// Append up to `max_frames` of `resampled` after dropping any remaining delay.
    fn emit(&mut self, resampled: &[Vec<f32>], max_frames: usize, output: &mut Vec<f32>) {
        let available = resampled.first().map_or(0, Vec::len);
        let skip = self.delay_frames.min(available);
        self.delay_frames -= skip;

        let frames = (available - skip).min(max_frames);
        output.reserve(frames * resampled.len());
        for frame in skip..skip + frames {
            for ch in resampled {
                output.push(ch[frame]);
            }
        }
        self.output_frames += frames as u64;
    }

    fn deinterleave(&mut self, input: &[f32]) {
        for frame in input.chunks_exact(self.channels) {
            for (buffer, &sample) in self.pending.iter_mut().zip(frame) {
                buffer.push(sample);
            }
        }
        self.input_frames += (input.len() / self.channels) as u64;
    }
}
