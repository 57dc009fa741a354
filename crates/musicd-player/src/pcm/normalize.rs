//! Automatic volume normalisation (AudioCompress style).
//!
//! Tracks the peak of each processed block in a ring of buckets, steers a
//! smoothed gain toward `target / peak`, and ramps the applied gain across
//! the block so level changes never click.

use crate::audio_format::AudioFormat;
use crate::pcm::sample;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NormalizerConfig {
    /// Target peak level as a fraction of full scale.
    pub target: f32,
    /// Largest gain ever applied.
    pub gain_max: f32,
    /// Smoothing exponent: each block moves the target gain by `1/2^smooth`.
    pub gain_smooth: u32,
    /// Number of past block peaks considered.
    pub buckets: usize,
    /// Drop gain immediately when a peak would clip.
    pub anticlip: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            target: 25_000.0 / 32_768.0,
            gain_max: 32.0,
            gain_smooth: 8,
            buckets: 400,
            anticlip: true,
        }
    }
}

#[derive(Debug)]
pub struct Normalizer {
    cfg: NormalizerConfig,
    peaks: Vec<f32>,
    bucket: usize,
    gain_current: f32,
    gain_target: f32,
}

impl Normalizer {
    pub fn new(cfg: NormalizerConfig) -> Self {
        let buckets = cfg.buckets.max(1);
        Self {
            cfg,
            peaks: vec![0.0; buckets],
            bucket: buckets - 1,
            gain_current: 1.0,
            gain_target: 1.0,
        }
    }

    pub fn reset(&mut self) {
        self.peaks.fill(0.0);
        self.gain_current = 1.0;
        self.gain_target = 1.0;
    }

    pub fn gain(&self) -> f32 {
        self.gain_current
    }

    /// Normalise one block of PCM in place.
    pub fn process(&mut self, buf: &mut [u8], format: &AudioFormat) {
        let size = format.sample_size();
        if size == 0 || buf.len() < size {
            return;
        }
        let full = sample::sample_max(format.bits) as f32 + 1.0;
        let count = buf.len() / size;

        let mut peak = 1.0 / full;
        let mut pos = 0usize;
        for (i, s) in buf.chunks_exact(size).enumerate() {
            let v = (sample::read(s, format.bits) as f32 / full).abs();
            if v > peak {
                peak = v;
                pos = i;
            }
        }

        self.bucket = (self.bucket + 1) % self.peaks.len();
        self.peaks[self.bucket] = peak;
        for &p in &self.peaks {
            if p > peak {
                peak = p;
                pos = 0;
            }
        }

        let smooth = (1u32 << self.cfg.gain_smooth.min(16)) as f32;
        let wanted = (self.cfg.target / peak).max(1.0);
        self.gain_target = (self.gain_target * (smooth - 1.0) + wanted) / smooth;
        self.gain_target = self.gain_target.min(self.cfg.gain_max);

        let no_clip = 1.0 / peak;
        if no_clip < self.gain_target {
            self.gain_target = no_clip;
            if self.cfg.anticlip {
                pos = 0;
            }
        } else {
            pos = count;
        }
        let pos = pos.max(1);

        let step = (self.gain_target - self.gain_current) / pos as f32;
        let mut gain = self.gain_current;
        for (i, s) in buf.chunks_exact_mut(size).enumerate() {
            if i < pos {
                gain += step;
            } else if i == pos {
                gain = self.gain_target;
            }
            let v = sample::read(s, format.bits) as f32 * gain;
            sample::write(s, format.bits, sample::clamp(v.round() as i64, format.bits));
        }
        self.gain_current = gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(value: i16, frames: usize) -> Vec<u8> {
        std::iter::repeat(value)
            .take(frames * 2)
            .flat_map(|v| v.to_ne_bytes())
            .collect()
    }

    fn first(buf: &[u8]) -> i16 {
        i16::from_ne_bytes([buf[0], buf[1]])
    }

    #[test]
    fn quiet_material_is_raised_gradually() {
        let mut n = Normalizer::new(NormalizerConfig::default());
        let mut last_gain = 1.0;
        for _ in 0..50 {
            let mut buf = block(1000, 256);
            n.process(&mut buf, &AudioFormat::CD);
            assert!(n.gain() >= last_gain);
            last_gain = n.gain();
        }
        assert!(last_gain > 1.0);
        assert!(last_gain <= NormalizerConfig::default().gain_max);
    }

    #[test]
    fn loud_material_never_clips() {
        let mut n = Normalizer::new(NormalizerConfig::default());
        for _ in 0..20 {
            let mut buf = block(1000, 256);
            n.process(&mut buf, &AudioFormat::CD);
        }
        let mut loud = block(30_000, 256);
        n.process(&mut loud, &AudioFormat::CD);
        assert!(first(&loud[loud.len() - 2..]) <= i16::MAX);
        assert!(n.gain() <= 32_768.0 / 30_000.0 + 1e-3);
    }

    #[test]
    fn reset_restores_unity() {
        let mut n = Normalizer::new(NormalizerConfig::default());
        let mut buf = block(100, 64);
        n.process(&mut buf, &AudioFormat::CD);
        n.reset();
        assert_eq!(n.gain(), 1.0);
    }
}
