//! Streaming sample-rate conversion.
//!
//! Wraps Rubato's asynchronous sinc resampler behind a push interface: callers
//! feed arbitrary-sized interleaved `f32` blocks and get back whatever output
//! the resampler produced. Input is staged until a full chunk is available;
//! [`StreamResampler::flush`] drains the remainder at end of stream.

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Configuration for the streaming resampler.
#[derive(Clone, Copy, Debug)]
pub struct ResampleConfig {
    /// Input chunk size in frames used for the steady-state resampling loop.
    ///
    /// Larger values reduce per-call overhead at the cost of latency.
    pub chunk_frames: usize,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self { chunk_frames: 1024 }
    }
}

pub struct StreamResampler {
    resampler: Box<dyn Resampler<f32>>,
    channels: usize,
    chunk_frames: usize,
    src_rate: u32,
    dst_rate: u32,
    pending: Vec<f32>,
    out: Vec<f32>,
    indexing: Indexing,
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("channels", &self.channels)
            .field("src_rate", &self.src_rate)
            .field("dst_rate", &self.dst_rate)
            .finish()
    }
}

impl StreamResampler {
    pub fn new(src_rate: u32, dst_rate: u32, channels: usize, cfg: ResampleConfig) -> Result<Self> {
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let oversampling_factor = 256;
        let interpolation = SincInterpolationType::Cubic;
        let window = WindowFunction::BlackmanHarris2;
        let f_cutoff = calculate_cutoff(sinc_len, window);

        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff,
            interpolation,
            oversampling_factor,
            window,
        };

        let chunk_frames = cfg.chunk_frames.max(1);
        let channels = channels.max(1);
        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .with_context(|| format!("resampler init {src_rate} -> {dst_rate} Hz"))?;

        let out_frames = (chunk_frames as f64 * f_ratio * 1.1).ceil() as usize + 64;
        tracing::debug!(src_rate, dst_rate, channels, chunk_frames, "resampler created");

        Ok(Self {
            resampler: Box::new(resampler),
            channels,
            chunk_frames,
            src_rate,
            dst_rate,
            pending: Vec::with_capacity(chunk_frames * channels * 2),
            out: vec![0.0; out_frames * channels],
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
        })
    }

    pub fn src_rate(&self) -> u32 {
        self.src_rate
    }

    pub fn dst_rate(&self) -> u32 {
        self.dst_rate
    }

    /// Feed interleaved samples; returns resampled output produced so far.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(input);
        let chunk_samples = self.chunk_frames * self.channels;
        let mut produced = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk_samples {
            let n = self.run(consumed, self.chunk_frames, None)?;
            produced.extend_from_slice(&self.out[..n * self.channels]);
            consumed += chunk_samples;
        }
        self.pending.drain(..consumed);
        Ok(produced)
    }

    /// Resample whatever input is still staged.
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let frames = self.pending.len() / self.channels;
        if frames == 0 {
            self.pending.clear();
            return Ok(Vec::new());
        }
        self.pending.resize(self.chunk_frames * self.channels, 0.0);
        let n = self.run(0, self.chunk_frames, Some(frames))?;
        self.pending.clear();
        Ok(self.out[..n * self.channels].to_vec())
    }

    /// Drop staged input and filter state (after a seek).
    pub fn reset(&mut self) {
        self.pending.clear();
        self.resampler.reset();
    }

    fn run(&mut self, offset: usize, frames: usize, partial: Option<usize>) -> Result<usize> {
        let end = offset + frames * self.channels;
        let input_adapter = InterleavedSlice::new(&self.pending[offset..end], self.channels, frames)
            .context("interleaved slice (input)")?;
        let out_capacity_frames = self.out.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.out, self.channels, out_capacity_frames)
                .context("interleaved slice (output)")?;

        self.indexing.input_offset = 0;
        self.indexing.output_offset = 0;
        self.indexing.partial_len = partial;

        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&self.indexing))
            .context("resampler process")?;
        Ok(nbr_out)
    }
}
