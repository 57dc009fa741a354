//! Decoder plugin backed by Symphonia.
//!
//! Probes the container, picks the default track and hands decoded packets
//! to the [`DecoderApi`] as native-endian signed PCM: 16-bit for sources up
//! to 16 bits, 32-bit otherwise.

use std::fs::File;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag as MetaTag};
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use super::{DecoderApi, DecoderPlugin};
use crate::audio_format::AudioFormat;
use crate::decoder_control::DecoderCommandKind;
use crate::pcm::ReplayGainInfo;
use crate::pcm::replay_gain::parse_tag_value;
use crate::song::{Song, Tag};

#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder;

impl DecoderPlugin for SymphoniaDecoder {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn suffixes(&self) -> &'static [&'static str] {
        &[
            "flac", "mp3", "m4a", "mp4", "aac", "alac", "wav", "aif", "aiff", "ogg", "oga",
        ]
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &[
            "audio/flac",
            "audio/mpeg",
            "audio/mp4",
            "audio/aac",
            "audio/wav",
            "audio/x-wav",
            "audio/aiff",
            "audio/ogg",
        ]
    }

    fn decode(&self, api: &mut DecoderApi<'_>, song: &Song) -> Result<()> {
        let path = song
            .local_path()
            .ok_or_else(|| anyhow!("unsupported URI scheme: {}", song.uri))?;
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;

        let mut hint = Hint::new();
        if let Some(ext) = song.suffix() {
            hint.with_extension(&ext);
        }
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let mut probed = symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let mut tags: Vec<MetaTag> = Vec::new();
        if let Some(rev) = probed.metadata.get().as_ref().and_then(|m| m.current()) {
            tags.extend(rev.tags().iter().cloned());
        }
        if let Some(rev) = probed.format.metadata().current() {
            tags.extend(rev.tags().iter().cloned());
        }

        let mut format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let track_id = track.id;
        let params: CodecParameters = track.codec_params.clone();

        let rate = params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;
        let channels = params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let source_bits = params.bits_per_sample.or(params.bits_per_coded_sample);
        let wide = source_bits.is_some_and(|b| b > 16);
        let audio_format = AudioFormat::new(
            rate,
            if wide { 32 } else { 16 },
            u8::try_from(channels).context("channel count")?,
        );
        let total_time = duration_from_codec_params(&params);

        let mut decoder =
            symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;

        tracing::debug!(
            codec = codec_name_from_params(&params).unwrap_or("unknown"),
            source_bits = ?source_bits,
            "symphonia stream opened"
        );
        api.initialized(audio_format, true, total_time)?;
        api.replay_gain(replay_gain_from_tags(&tags));
        let tag = tag_from_tags(&tags, total_time);
        if !tag.is_empty() {
            api.tag(tag);
        }

        let mut pcm: Vec<u8> = Vec::new();
        loop {
            match api.command() {
                DecoderCommandKind::Stop => break,
                DecoderCommandKind::Seek => {
                    match seek(format.as_mut(), track_id, api.seek_where()) {
                        Ok(()) => {
                            decoder.reset();
                            api.command_finished();
                        }
                        Err(e) => {
                            tracing::warn!("seek failed: {e:#}");
                            api.seek_error();
                        }
                    }
                    continue;
                }
                _ => {}
            }

            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            pcm.clear();
            if wide {
                let mut buf = SampleBuffer::<i32>::new(decoded.capacity() as u64, *decoded.spec());
                buf.copy_interleaved_ref(decoded);
                pcm.extend(buf.samples().iter().flat_map(|s| s.to_ne_bytes()));
            } else {
                let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
                buf.copy_interleaved_ref(decoded);
                pcm.extend(buf.samples().iter().flat_map(|s| s.to_ne_bytes()));
            }

            let (time, bit_rate) = match params.time_base {
                Some(tb) => {
                    let t = tb.calc_time(packet.ts());
                    let d = tb.calc_time(packet.dur());
                    let dur = d.seconds as f64 + d.frac;
                    let kbps = if dur > 0.0 {
                        (packet.buf().len() as f64 * 8.0 / dur / 1000.0) as u16
                    } else {
                        0
                    };
                    ((t.seconds as f64 + t.frac) as f32, kbps)
                }
                None => (0.0, 0),
            };

            if api.data(&pcm, time, bit_rate)? == DecoderCommandKind::Stop {
                break;
            }
        }
        Ok(())
    }
}

fn seek(format: &mut dyn FormatReader, track_id: u32, secs: f64) -> Result<()> {
    let secs = secs.max(0.0);
    let time = Time::new(secs.trunc() as u64, secs.fract());
    format.seek(
        SeekMode::Accurate,
        SeekTo::Time {
            time,
            track_id: Some(track_id),
        },
    )?;
    Ok(())
}

/// Best-effort duration in seconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_from_codec_params(params: &CodecParameters) -> Option<f32> {
    let frames = params.n_frames?;
    let rate = params.sample_rate?;
    if rate == 0 {
        return None;
    }
    Some((frames as f64 / rate as f64) as f32)
}

/// Best-effort codec label for logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}

fn replay_gain_from_tags(tags: &[MetaTag]) -> Option<ReplayGainInfo> {
    let mut info = ReplayGainInfo::default();
    for tag in tags {
        let value = || parse_tag_value(&tag.value.to_string());
        match tag.std_key {
            Some(StandardTagKey::ReplayGainTrackGain) => info.track_gain = value(),
            Some(StandardTagKey::ReplayGainTrackPeak) => info.track_peak = value(),
            Some(StandardTagKey::ReplayGainAlbumGain) => info.album_gain = value(),
            Some(StandardTagKey::ReplayGainAlbumPeak) => info.album_peak = value(),
            _ => {}
        }
    }
    (!info.is_empty()).then_some(info)
}

fn tag_from_tags(tags: &[MetaTag], duration: Option<f32>) -> Tag {
    let mut out = Tag {
        duration,
        ..Tag::default()
    };
    for tag in tags {
        let value = tag.value.to_string();
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => out.title = Some(value),
            Some(StandardTagKey::Artist) => out.artist = Some(value),
            Some(StandardTagKey::Album) => out.album = Some(value),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::*;
    use symphonia::core::meta::Value;

    fn meta(key: StandardTagKey, raw: &str, value: &str) -> MetaTag {
        MetaTag::new(Some(key), raw, Value::String(value.to_string()))
    }

    #[test]
    fn duration_from_codec_params_handles_zero_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_from_codec_params(&params).is_none());
    }

    #[test]
    fn duration_from_codec_params_computes() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(48_000);
        params.n_frames = Some(96_000);
        assert_eq!(duration_from_codec_params(&params), Some(2.0));
    }

    #[test]
    fn codec_name_from_params_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name_from_params(&params), Some("FLAC"));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16"));
        assert!(codec_name_from_params(&CodecParameters::new()).is_none());
    }

    #[test]
    fn replay_gain_tags_are_parsed() {
        let tags = vec![
            meta(
                StandardTagKey::ReplayGainTrackGain,
                "REPLAYGAIN_TRACK_GAIN",
                "-6.50 dB",
            ),
            meta(
                StandardTagKey::ReplayGainTrackPeak,
                "REPLAYGAIN_TRACK_PEAK",
                "0.98",
            ),
        ];
        let info = replay_gain_from_tags(&tags).unwrap();
        assert_eq!(info.track_gain, Some(-6.5));
        assert_eq!(info.track_peak, Some(0.98));
        assert!(info.album_gain.is_none());
        assert!(replay_gain_from_tags(&[]).is_none());
    }

    #[test]
    fn descriptive_tags_are_collected() {
        let tags = vec![
            meta(StandardTagKey::TrackTitle, "TITLE", "Song"),
            meta(StandardTagKey::Artist, "ARTIST", "Band"),
        ];
        let tag = tag_from_tags(&tags, Some(3.0));
        assert_eq!(tag.title.as_deref(), Some("Song"));
        assert_eq!(tag.artist.as_deref(), Some("Band"));
        assert!(tag.album.is_none());
        assert_eq!(tag.duration, Some(3.0));
    }

    #[test]
    fn claims_common_suffixes() {
        let plugin = SymphoniaDecoder;
        assert!(plugin.supports_suffix("FLAC"));
        assert!(!plugin.supports_suffix("xyz"));
    }

    #[test]
    fn suffix_table_covers_container_formats() {
        let plugin = SymphoniaDecoder;
        for suffix in [
            "flac", "mp3", "ogg", "oga", "wav", "aif", "aiff", "m4a", "mp4", "aac", "alac",
        ] {
            assert!(plugin.supports_suffix(suffix), "{suffix}");
        }
        assert_eq!(plugin.suffixes().len(), 11);
    }
}
