//! Output device discovery and stream config negotiation for the cpal
//! output plugin and the `list-devices` command.

use std::cmp::Ordering;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

use crate::audio_format::AudioFormat;

/// Device callback buffers are capped at this many frames.
pub const MAX_BUFFER_FRAMES: u32 = 16_384;

/// Find the output device whose name contains `needle` (case-insensitive),
/// or the host default when `needle` is unset.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device"));
    };
    host.output_devices()
        .context("enumerate output devices")?
        .find(|d| {
            d.description()
                .is_ok_and(|desc| matches_device_name(&desc.name(), needle))
        })
        .ok_or_else(|| anyhow!("no output device matched {needle:?}"))
}

/// How well one supported config range fits the buffer format.
///
/// Compared in field order: staying at or below the song's rate beats
/// going above it, then a closer rate, then a matching channel count, then
/// a better sample format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Fit {
    at_or_below: bool,
    rate_distance: u32,
    channels_match: bool,
    format_rank: u8,
}

impl Ord for Fit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at_or_below
            .cmp(&other.at_or_below)
            .then(other.rate_distance.cmp(&self.rate_distance))
            .then(self.channels_match.cmp(&other.channels_match))
            .then(other.format_rank.cmp(&self.format_rank))
    }
}

impl PartialOrd for Fit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn fit(rate: u32, channels: u16, sample_format: cpal::SampleFormat, want: &AudioFormat) -> Fit {
    Fit {
        at_or_below: rate <= want.sample_rate,
        rate_distance: rate.abs_diff(want.sample_rate),
        channels_match: channels == u16::from(want.channels),
        format_rank: sample_format_rank(sample_format),
    }
}

/// Choose the supported output config closest to `want`.
///
/// The song's rate is used directly when a range covers it; otherwise the
/// nearest supported rate is taken and the output resamples.
pub fn pick_output_config(
    device: &cpal::Device,
    want: &AudioFormat,
) -> Result<cpal::SupportedStreamConfig> {
    device
        .supported_output_configs()
        .context("query output configs")?
        .map(|range| {
            let rate = want
                .sample_rate
                .clamp(range.min_sample_rate(), range.max_sample_rate());
            let score = fit(rate, range.channels(), range.sample_format(), want);
            (score, range.with_sample_rate(rate))
        })
        .max_by_key(|(score, _)| *score)
        .map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("device reports no output configs"))
}

/// Fixed callback buffer size for `config`, at most `max_frames` and never
/// below the device minimum. `None` leaves the device default.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    max_frames: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_frames(*min, *max, max_frames)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn clamp_frames(min: u32, max: u32, cap: u32) -> u32 {
    max.min(cap.min(MAX_BUFFER_FRAMES)).max(min)
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}

/// Output device name, sample-rate span and widest channel count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    pub max_channels: u16,
    pub is_default: bool,
}

/// Enumerate output devices of `host`.
///
/// Devices reporting no usable config are skipped with a warning.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|desc| desc.name().to_string());

    let mut out = Vec::new();
    for d in host.output_devices().context("enumerate output devices")? {
        let name = d.description()?.name().to_string();
        let mut span: Option<(u32, u32, u16)> = None;
        if let Ok(ranges) = d.supported_output_configs() {
            for r in ranges {
                let (lo, hi, ch) = span.unwrap_or((u32::MAX, 0, 0));
                span = Some((
                    lo.min(r.min_sample_rate()),
                    hi.max(r.max_sample_rate()),
                    ch.max(r.channels()),
                ));
            }
        }
        if span.is_none() {
            span = d
                .default_output_config()
                .ok()
                .map(|cfg| (cfg.sample_rate(), cfg.sample_rate(), cfg.channels()));
        }
        let Some((min_rate, max_rate, max_channels)) = span.filter(|(lo, hi, _)| *hi >= *lo)
        else {
            tracing::warn!(device = %name, "skipping device without usable output config");
            continue;
        };
        out.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            min_rate,
            max_rate,
            max_channels,
        });
    }
    Ok(out)
}
