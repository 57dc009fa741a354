use crate::audio_format::AudioFormat;
use crate::output_buffer::{DEFAULT_CHUNK_SIZE, chunks_for_duration};
use crate::pcm::{ReplayGainConfig, VOLUME_MAX};

/// Playback tuning parameters shared by the decoder, player and output stages.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Output buffer duration in seconds (at the buffer format).
    pub buffer_seconds: f32,
    /// Percentage of the output buffer decoded before playback starts.
    pub buffer_before_play: f32,
    /// Payload bytes per output buffer chunk.
    pub chunk_size: usize,
    /// Fixed buffer format; `None` keeps each song's native format.
    pub audio_format: Option<AudioFormat>,
    /// Cross-fade duration in seconds; 0 disables.
    pub cross_fade: f32,
    /// ReplayGain handling applied while decoding.
    pub replay_gain: ReplayGainConfig,
    /// Automatic volume normalisation while decoding.
    pub volume_normalization: bool,
    /// Initial software volume, 0..=1000.
    pub software_volume: u16,
    /// Resampler chunk size in frames for the device stage.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            buffer_seconds: 2.0,
            buffer_before_play: 10.0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            audio_format: None,
            cross_fade: 0.0,
            replay_gain: ReplayGainConfig::default(),
            volume_normalization: false,
            software_volume: VOLUME_MAX,
            chunk_frames: 1024,
            refill_max_frames: 4096,
        }
    }
}

impl PlaybackConfig {
    /// Output buffer ring size in chunks.
    ///
    /// Sized against the configured format, or CD audio when songs keep
    /// their native format.
    pub fn buffer_chunks(&self) -> usize {
        let format = self.audio_format.unwrap_or(AudioFormat::CD);
        chunks_for_duration(self.buffer_seconds, &format, self.chunk_size)
    }

    /// Chunks that must be decoded before playback starts, for a ring of
    /// `capacity` chunks.
    pub fn buffered_before_play_chunks(&self, capacity: usize) -> usize {
        let percent = if self.buffer_before_play.is_finite() {
            self.buffer_before_play.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let chunks = (percent as f64 / 100.0 * capacity as f64) as usize;
        chunks.min(capacity.saturating_sub(1))
    }
}
