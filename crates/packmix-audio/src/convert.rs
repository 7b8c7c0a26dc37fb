//! Conversion of decoded audio to the engine's output layout.

use packmix_core::Result;

use crate::resample::Resampler;

/// Map interleaved samples between mono and stereo.
///
/// Mono is duplicated into both channels; stereo is averaged down to mono.
/// Any other pairing keeps the first `to` channels of each frame, padding with
/// silence when the source is narrower.
pub fn remix(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        match (from, to) {
            (1, 2) => {
                out.push(frame[0]);
                out.push(frame[0]);
            }
            (2, 1) => out.push((frame[0] + frame[1]) * 0.5),
            _ => {
                for ch in 0..to {
                    out.push(frame.get(ch).copied().unwrap_or(0.0));
                }
            }
        }
    }
    out
}

/// Remixes then resamples decoded chunks into the engine layout.
pub struct Converter {
    from_channels: usize,
    to_channels: usize,
    resampler: Resampler,
}

impl Converter {
    pub fn new(from_rate: u32, from_channels: usize, to_rate: u32, to_channels: usize) -> Result<Self> {
        Ok(Self {
            from_channels,
            to_channels,
            resampler: Resampler::new(from_rate, to_rate, to_channels)?,
        })
    }

    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        if self.from_channels == self.to_channels {
            self.resampler.process(samples)
        } else {
            let remixed = remix(samples, self.from_channels, self.to_channels);
            self.resampler.process(&remixed)
        }
    }

    pub fn flush(&mut self) -> Result<Vec<f32>> {
        self.resampler.flush()
    }

    pub fn reset(&mut self) {
        self.resampler.reset();
    }

    /// Convert a complete buffer.
    pub fn convert_all(mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let mut out = self.process(samples)?;
        out.extend(self.flush()?);
        Ok(out)
    }
}
