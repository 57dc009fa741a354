//! What decoder plugins call while decoding a song.

use std::borrow::Cow;

use anyhow::{Context, Result};

use crate::audio_format::AudioFormat;
use crate::config::PlaybackConfig;
use crate::decoder_control::{DecoderCommandKind, DecoderControl};
use crate::output_buffer::{OutputBuffer, SendResult};
use crate::pcm::replay_gain::replay_gain_scale;
use crate::pcm::{Normalizer, NormalizerConfig, PcmConverter, ReplayGainInfo, pcm_scale};
use crate::song::Tag;

pub struct DecoderApi<'a> {
    dc: &'a DecoderControl,
    buffer: &'a OutputBuffer,
    config: &'a PlaybackConfig,
    converter: Option<PcmConverter>,
    normalizer: Option<Normalizer>,
    replay_gain: f32,
    out_format: Option<AudioFormat>,
}

impl<'a> DecoderApi<'a> {
    pub(crate) fn new(
        dc: &'a DecoderControl,
        buffer: &'a OutputBuffer,
        config: &'a PlaybackConfig,
    ) -> Self {
        Self {
            dc,
            buffer,
            config,
            converter: None,
            normalizer: None,
            replay_gain: replay_gain_scale(None, &config.replay_gain),
            out_format: None,
        }
    }

    /// Report the song's native format; playback can begin after this.
    ///
    /// The buffer format is the configured output format, or `format` itself
    /// when none is configured.
    pub fn initialized(
        &mut self,
        format: AudioFormat,
        seekable: bool,
        total_time: Option<f32>,
    ) -> Result<()> {
        format
            .validate()
            .with_context(|| format!("decoder reported format {format}"))?;
        let out_format = self.config.audio_format.unwrap_or(format);
        self.converter = if out_format != format {
            Some(PcmConverter::new(format, out_format)?)
        } else {
            None
        };
        if self.config.volume_normalization {
            self.normalizer = Some(Normalizer::new(NormalizerConfig::default()));
        }
        self.out_format = Some(out_format);
        tracing::info!(
            format = %format,
            out_format = %out_format,
            seekable,
            total_time = ?total_time,
            "decoder initialized"
        );
        self.dc
            .set_decoding(format, out_format, seekable, total_time);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.out_format.is_some()
    }

    /// The command the decoder should act on now.
    pub fn command(&self) -> DecoderCommandKind {
        self.dc.command()
    }

    /// Target of the pending SEEK in seconds.
    pub fn seek_where(&self) -> f64 {
        self.dc.seek_where().unwrap_or(0.0)
    }

    /// Acknowledge the pending command.
    ///
    /// For a SEEK this drops the audio buffered from before the seek point
    /// and resets conversion state first.
    pub fn command_finished(&mut self) {
        if self.dc.command() == DecoderCommandKind::Seek {
            self.buffer.clear();
            if let Some(c) = self.converter.as_mut() {
                c.reset();
            }
            self.dc.set_seek_error(false);
        }
        self.dc.command_finished();
    }

    /// Acknowledge the pending SEEK as failed.
    pub fn seek_error(&mut self) {
        self.dc.set_seek_error(true);
        self.dc.command_finished();
    }

    /// Apply `info` to all following PCM.
    pub fn replay_gain(&mut self, info: Option<ReplayGainInfo>) {
        self.replay_gain = replay_gain_scale(info.as_ref(), &self.config.replay_gain);
        if let Some(info) = info.as_ref() {
            tracing::debug!(
                track_gain = ?info.track_gain,
                album_gain = ?info.album_gain,
                scale = self.replay_gain,
                "replay gain"
            );
        }
        self.dc.set_replay_gain(info);
    }

    /// Publish stream metadata.
    pub fn tag(&mut self, tag: Tag) {
        self.dc.set_tag(tag);
    }

    /// Submit decoded PCM in the song's native format.
    ///
    /// Converts it to the buffer format, applies ReplayGain and
    /// normalisation, and places it in the output buffer, blocking while the
    /// buffer is full. Returns STOP or SEEK when one is pending (the data is
    /// then dropped), `None` otherwise.
    pub fn data(&mut self, pcm: &[u8], time: f32, bit_rate: u16) -> Result<DecoderCommandKind> {
        let pending = self.dc.command();
        if matches!(pending, DecoderCommandKind::Stop | DecoderCommandKind::Seek) {
            return Ok(pending);
        }
        let out_format = self
            .out_format
            .context("decoder submitted data before initialized")?;

        let converted = match self.converter.as_mut() {
            Some(c) => c.convert(pcm)?,
            None => Cow::Borrowed(pcm),
        };
        Ok(self.submit(converted, out_format, time, bit_rate))
    }

    /// Apply ReplayGain and normalisation to buffer-format PCM and send it.
    fn submit(
        &mut self,
        pcm: Cow<'_, [u8]>,
        out_format: AudioFormat,
        time: f32,
        bit_rate: u16,
    ) -> DecoderCommandKind {
        let needs_gain = (self.replay_gain - 1.0).abs() > f32::EPSILON;
        let result = if needs_gain || self.normalizer.is_some() {
            let mut owned = pcm.into_owned();
            if needs_gain {
                pcm_scale(&mut owned, &out_format, self.replay_gain);
            }
            if let Some(n) = self.normalizer.as_mut() {
                n.process(&mut owned, &out_format);
            }
            self.buffer.send(self.dc, &owned, time, bit_rate)
        } else {
            self.buffer.send(self.dc, &pcm, time, bit_rate)
        };

        match result {
            SendResult::Sent => DecoderCommandKind::None,
            SendResult::Stop => DecoderCommandKind::Stop,
            SendResult::Seek => DecoderCommandKind::Seek,
        }
    }

    /// Drain conversion state and expose the partial tail chunk.
    ///
    /// Returns STOP or SEEK when one arrived meanwhile; the tail chunk then
    /// stays hidden.
    pub(crate) fn finish(&mut self) -> Result<DecoderCommandKind> {
        let pending = self.dc.command();
        if matches!(pending, DecoderCommandKind::Stop | DecoderCommandKind::Seek) {
            return Ok(pending);
        }
        let tail = match self.converter.as_mut() {
            Some(c) => c.flush()?,
            None => Vec::new(),
        };
        if let Some(out_format) = self.out_format.filter(|_| !tail.is_empty()) {
            let cmd = self.submit(Cow::Owned(tail), out_format, 0.0, 0);
            if cmd != DecoderCommandKind::None {
                return Ok(cmd);
            }
        }
        self.buffer.flush();
        Ok(DecoderCommandKind::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder_control::DecoderCommand;
    use crate::output_buffer::Chunk;
    use crate::pcm::{ReplayGainConfig, ReplayGainMode};

    fn control(ob: &OutputBuffer) -> DecoderControl {
        DecoderControl::new(ob.decoder_notify().clone(), ob.player_notify().clone())
    }

    fn frames(left: i16, right: i16, n: usize) -> Vec<u8> {
        (0..n)
            .flat_map(|_| [left.to_ne_bytes(), right.to_ne_bytes()])
            .flatten()
            .collect()
    }

    fn drain(ob: &OutputBuffer) -> Vec<u8> {
        ob.flush();
        let mut spare = Chunk::new(ob.chunk_size());
        let mut out = Vec::new();
        while ob.take_head(&mut spare) {
            out.extend_from_slice(spare.data());
        }
        out
    }

    fn samples16(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn native_format_passes_through() {
        let ob = OutputBuffer::new(8, 64);
        let dc = control(&ob);
        let config = PlaybackConfig::default();
        let mut api = DecoderApi::new(&dc, &ob, &config);
        api.initialized(AudioFormat::CD, true, None).unwrap();
        let pcm = frames(7, -7, 32);
        assert_eq!(api.data(&pcm, 0.0, 0).unwrap(), DecoderCommandKind::None);
        assert_eq!(ob.available(), 2);
        assert_eq!(drain(&ob), pcm);
    }

    #[test]
    fn fixed_format_downmixes_to_mono() {
        let ob = OutputBuffer::new(8, 64);
        let dc = control(&ob);
        let config = PlaybackConfig {
            audio_format: Some(AudioFormat::new(44_100, 16, 1)),
            ..PlaybackConfig::default()
        };
        let mut api = DecoderApi::new(&dc, &ob, &config);
        api.initialized(AudioFormat::CD, true, None).unwrap();
        assert_eq!(dc.in_format(), Some(AudioFormat::CD));
        assert_eq!(dc.out_format(), Some(AudioFormat::new(44_100, 16, 1)));

        api.data(&frames(1000, 3000, 64), 0.0, 0).unwrap();
        let out = samples16(&drain(&ob));
        assert_eq!(out.len(), 64);
        assert!(out.iter().all(|&s| s == 2000));
    }

    #[test]
    fn fixed_format_widens_bit_depth() {
        let ob = OutputBuffer::new(8, 64);
        let dc = control(&ob);
        let config = PlaybackConfig {
            audio_format: Some(AudioFormat::new(44_100, 24, 2)),
            ..PlaybackConfig::default()
        };
        let mut api = DecoderApi::new(&dc, &ob, &config);
        api.initialized(AudioFormat::CD, true, None).unwrap();
        api.data(&frames(256, -256, 8), 0.0, 0).unwrap();
        let out: Vec<i32> = drain(&ob)
            .chunks_exact(4)
            .map(|b| i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(out.len(), 16);
        assert_eq!(&out[..2], &[65_536, -65_536]);
    }

    #[test]
    fn replay_gain_scales_samples() {
        let ob = OutputBuffer::new(8, 64);
        let dc = control(&ob);
        let config = PlaybackConfig {
            replay_gain: ReplayGainConfig {
                mode: ReplayGainMode::Track,
                ..ReplayGainConfig::default()
            },
            ..PlaybackConfig::default()
        };
        let mut api = DecoderApi::new(&dc, &ob, &config);
        api.initialized(AudioFormat::CD, true, None).unwrap();
        api.replay_gain(Some(ReplayGainInfo {
            track_gain: Some(-6.0206),
            ..ReplayGainInfo::default()
        }));
        assert!(dc.replay_gain().is_some());

        api.data(&frames(1000, -1000, 16), 0.0, 0).unwrap();
        let out = samples16(&drain(&ob));
        assert_eq!(out.len(), 32);
        for pair in out.chunks_exact(2) {
            assert!((499..=501).contains(&pair[0]), "left {}", pair[0]);
            assert!((-501..=-499).contains(&pair[1]), "right {}", pair[1]);
        }
    }

    #[test]
    fn normalization_lifts_quiet_audio() {
        let ob = OutputBuffer::new(8, 256);
        let dc = control(&ob);
        let config = PlaybackConfig {
            volume_normalization: true,
            ..PlaybackConfig::default()
        };
        let mut api = DecoderApi::new(&dc, &ob, &config);
        api.initialized(AudioFormat::CD, true, None).unwrap();
        api.data(&frames(1000, 1000, 64), 0.0, 0).unwrap();
        let out = samples16(&drain(&ob));
        assert_eq!(out.len(), 128);
        assert!(out.iter().all(|&s| s >= 1000));
        assert!(out[out.len() - 1] > 1000);
    }

    #[test]
    fn pending_stop_drops_data() {
        let ob = OutputBuffer::new(8, 64);
        let dc = control(&ob);
        let config = PlaybackConfig::default();
        let mut api = DecoderApi::new(&dc, &ob, &config);
        api.initialized(AudioFormat::CD, true, None).unwrap();
        dc.post(DecoderCommand::Stop);
        assert_eq!(
            api.data(&frames(1, 1, 32), 0.0, 0).unwrap(),
            DecoderCommandKind::Stop
        );
        assert_eq!(api.finish().unwrap(), DecoderCommandKind::Stop);
        assert!(ob.is_empty());
        assert_eq!(ob.pending_tail(), 0);
    }

    #[test]
    fn data_before_initialized_is_an_error() {
        let ob = OutputBuffer::new(8, 64);
        let dc = control(&ob);
        let config = PlaybackConfig::default();
        let mut api = DecoderApi::new(&dc, &ob, &config);
        assert!(api.data(&frames(1, 1, 4), 0.0, 0).is_err());
    }

    #[test]
    fn finished_seek_clears_buffer_and_converter() {
        let ob = OutputBuffer::new(8, 4096);
        let dc = control(&ob);
        let config = PlaybackConfig {
            audio_format: Some(AudioFormat::new(48_000, 16, 2)),
            ..PlaybackConfig::default()
        };
        let mut api = DecoderApi::new(&dc, &ob, &config);
        api.initialized(AudioFormat::CD, true, None).unwrap();
        // Short blocks stay staged inside the resampler.
        api.data(&frames(500, 500, 100), 0.0, 0).unwrap();

        dc.post(DecoderCommand::Seek(2.0));
        assert_eq!(api.command(), DecoderCommandKind::Seek);
        assert_eq!(api.seek_where(), 2.0);
        api.command_finished();
        assert_eq!(api.command(), DecoderCommandKind::None);

        assert_eq!(api.finish().unwrap(), DecoderCommandKind::None);
        assert!(ob.is_empty());
        assert_eq!(ob.pending_tail(), 0);
    }

    #[test]
    fn finish_flushes_the_converter_tail() {
        let ob = OutputBuffer::new(8, 4096);
        let dc = control(&ob);
        let config = PlaybackConfig {
            audio_format: Some(AudioFormat::new(48_000, 16, 2)),
            ..PlaybackConfig::default()
        };
        let mut api = DecoderApi::new(&dc, &ob, &config);
        api.initialized(AudioFormat::CD, true, None).unwrap();
        api.data(&frames(500, 500, 100), 0.0, 0).unwrap();
        assert_eq!(ob.pending_tail(), 0);

        assert_eq!(api.finish().unwrap(), DecoderCommandKind::None);
        assert!(ob.available() >= 1);
        assert_eq!(ob.pending_tail(), 0);
    }

    fn tail_level(volume_normalization: bool) -> i64 {
        let ob = OutputBuffer::new(8, 4096);
        let dc = control(&ob);
        let config = PlaybackConfig {
            audio_format: Some(AudioFormat::new(48_000, 16, 2)),
            volume_normalization,
            ..PlaybackConfig::default()
        };
        let mut api = DecoderApi::new(&dc, &ob, &config);
        api.initialized(AudioFormat::CD, true, None).unwrap();
        api.data(&frames(1000, 1000, 900), 0.0, 0).unwrap();
        assert!(ob.is_empty());
        api.finish().unwrap();
        samples16(&drain(&ob))
            .iter()
            .map(|&s| i64::from(s).abs())
            .sum()
    }

    #[test]
    fn finish_tail_goes_through_normalization() {
        let plain = tail_level(false);
        assert!(plain > 0);
        assert!(tail_level(true) > plain);
    }
}
