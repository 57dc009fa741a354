//! Conversion from a song's native format to the buffer format.
//!
//! Non-identity conversions go through interleaved `f32`: channel mapping
//! first, then sample-rate conversion, then requantisation to the output bit
//! depth.

use std::borrow::Cow;

use anyhow::Result;

use crate::audio_format::AudioFormat;
use crate::pcm::sample;
use crate::resample::{ResampleConfig, StreamResampler};

#[derive(Debug)]
pub struct PcmConverter {
    in_format: AudioFormat,
    out_format: AudioFormat,
    resampler: Option<StreamResampler>,
}

impl PcmConverter {
    pub fn new(in_format: AudioFormat, out_format: AudioFormat) -> Result<Self> {
        let resampler = if in_format.sample_rate != out_format.sample_rate {
            Some(StreamResampler::new(
                in_format.sample_rate,
                out_format.sample_rate,
                out_format.channels as usize,
                ResampleConfig::default(),
            )?)
        } else {
            None
        };
        if in_format != out_format {
            tracing::info!(from = %in_format, to = %out_format, "pcm conversion enabled");
        }
        Ok(Self {
            in_format,
            out_format,
            resampler,
        })
    }

    pub fn in_format(&self) -> AudioFormat {
        self.in_format
    }

    pub fn out_format(&self) -> AudioFormat {
        self.out_format
    }

    pub fn is_identity(&self) -> bool {
        self.in_format == self.out_format
    }

    /// Convert one block of native PCM to the output format.
    pub fn convert<'a>(&mut self, src: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        if self.is_identity() {
            return Ok(Cow::Borrowed(src));
        }
        let samples = sample::to_f32(src, &self.in_format);
        let mapped = remap_channels(
            &samples,
            self.in_format.channels as usize,
            self.out_format.channels as usize,
        );
        let resampled = match self.resampler.as_mut() {
            Some(r) => r.process(&mapped)?,
            None => mapped,
        };
        Ok(Cow::Owned(sample::from_f32(&resampled, self.out_format.bits)))
    }

    /// Emit samples still held inside the resampler.
    pub fn flush(&mut self) -> Result<Vec<u8>> {
        match self.resampler.as_mut() {
            Some(r) => Ok(sample::from_f32(&r.flush()?, self.out_format.bits)),
            None => Ok(Vec::new()),
        }
    }

    /// Forget stream state (after a seek).
    pub fn reset(&mut self) {
        if let Some(r) = self.resampler.as_mut() {
            r.reset();
        }
    }
}

/// Map interleaved samples from `src_channels` to `dst_channels`.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - equal counts: pass-through
/// - other layouts: best-effort "clamp to available channels"
pub fn remap_channels(src: &[f32], src_channels: usize, dst_channels: usize) -> Vec<f32> {
    if src_channels == dst_channels || src_channels == 0 || dst_channels == 0 {
        return src.to_vec();
    }
    let frames = src.len() / src_channels;
    let mut out = Vec::with_capacity(frames * dst_channels);
    for frame in src.chunks_exact(src_channels) {
        for dst_ch in 0..dst_channels {
            let v = match (src_channels, dst_channels) {
                (2, 1) => 0.5 * (frame[0] + frame[1]),
                (1, _) => frame[0],
                _ => frame[dst_ch.min(src_channels - 1)],
            };
            out.push(v);
        }
    }
    out
}
