//! Configuration loading and parsing.
//!
//! The daemon reads an optional TOML file with `[audio]` and `[output]`
//! tables; command-line flags override what it sets.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use musicd_player::output::OutputConfig;
use musicd_player::pcm::{ReplayGainMode, VOLUME_MAX};
use musicd_player::{AudioFormat, PipelineConfig, PlaybackConfig};

pub const CONFIG_FILE_NAME: &str = "musicd.toml";

/// Top-level daemon configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct DaemonConfig {
    pub audio: Option<AudioSection>,
    pub output: Option<OutputSection>,
}

/// `[audio]`: decoding and playback tuning.
#[derive(Debug, Default, Deserialize)]
pub struct AudioSection {
    /// Output buffer length in seconds.
    pub buffer_seconds: Option<f32>,
    /// Percent of the buffer decoded before playback starts.
    pub buffer_before_play: Option<f32>,
    /// Bytes per buffer chunk.
    pub chunk_size: Option<usize>,
    /// Fixed buffer format as `rate:bits:channels`.
    pub output_format: Option<String>,
    pub crossfade_seconds: Option<f32>,
    /// `off`, `track` or `album`.
    pub replay_gain: Option<String>,
    pub replay_gain_preamp: Option<f32>,
    pub replay_gain_missing_preamp: Option<f32>,
    pub volume_normalization: Option<bool>,
    /// Software volume, 0..=1000.
    pub volume: Option<u16>,
}

/// `[output]`: where audio goes.
#[derive(Debug, Default, Deserialize)]
pub struct OutputSection {
    pub plugin: Option<String>,
    /// Device name substring.
    pub device: Option<String>,
    /// Pace the null output to real time.
    pub sync: Option<bool>,
    /// Device-side queue length in seconds.
    pub buffer_seconds: Option<f32>,
    /// Resampler input chunk size in frames.
    pub chunk_frames: Option<usize>,
    /// Callback refill cap in frames.
    pub refill_max_frames: Option<usize>,
}

/// Values given on the command line.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub device: Option<String>,
    pub output: Option<String>,
    pub crossfade: Option<f32>,
    pub buffer_seconds: Option<f32>,
    pub replay_gain: Option<String>,
    pub volume: Option<u16>,
}

impl DaemonConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<DaemonConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Load `explicit`, or `musicd.toml` next to the executable if present,
    /// or fall back to built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match auto_config_path() {
            Some(path) if path.exists() => {
                tracing::info!(path = ?path, "using config next to executable");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}

fn auto_config_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
}

/// Treat empty or whitespace-only device names as unset.
fn normalize_device_name(name: Option<String>) -> Option<String> {
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

/// Combine file settings and overrides into a pipeline config.
pub fn pipeline_config(cfg: &DaemonConfig, overrides: &Overrides) -> Result<PipelineConfig> {
    let audio = cfg.audio.as_ref();
    let output = cfg.output.as_ref();
    let mut playback = PlaybackConfig::default();

    if let Some(secs) = overrides
        .buffer_seconds
        .or_else(|| audio.and_then(|a| a.buffer_seconds))
    {
        playback.buffer_seconds = secs;
    }
    if let Some(percent) = audio.and_then(|a| a.buffer_before_play) {
        playback.buffer_before_play = percent;
    }
    if let Some(size) = audio.and_then(|a| a.chunk_size) {
        if size == 0 {
            return Err(anyhow!("chunk_size must be positive"));
        }
        playback.chunk_size = size;
    }
    if let Some(raw) = audio.and_then(|a| a.output_format.as_deref()) {
        let format: AudioFormat = raw
            .parse()
            .with_context(|| format!("parse output_format {raw:?}"))?;
        playback.audio_format = Some(format);
    }
    if let Some(secs) = overrides
        .crossfade
        .or_else(|| audio.and_then(|a| a.crossfade_seconds))
    {
        playback.cross_fade = secs;
    }
    if let Some(mode) = overrides
        .replay_gain
        .as_deref()
        .or_else(|| audio.and_then(|a| a.replay_gain.as_deref()))
    {
        playback.replay_gain.mode = mode.parse::<ReplayGainMode>()?;
    }
    if let Some(db) = audio.and_then(|a| a.replay_gain_preamp) {
        playback.replay_gain.preamp = db;
    }
    if let Some(db) = audio.and_then(|a| a.replay_gain_missing_preamp) {
        playback.replay_gain.missing_preamp = db;
    }
    if let Some(on) = audio.and_then(|a| a.volume_normalization) {
        playback.volume_normalization = on;
    }
    if let Some(volume) = overrides.volume.or_else(|| audio.and_then(|a| a.volume)) {
        playback.software_volume = volume.min(VOLUME_MAX);
    }

    let mut out = OutputConfig {
        plugin: overrides
            .output
            .clone()
            .or_else(|| output.and_then(|o| o.plugin.clone())),
        device: normalize_device_name(
            overrides
                .device
                .clone()
                .or_else(|| output.and_then(|o| o.device.clone())),
        ),
        sync: output.and_then(|o| o.sync).unwrap_or(true),
        buffer_seconds: playback.buffer_seconds,
        chunk_frames: playback.chunk_frames,
        refill_max_frames: playback.refill_max_frames,
    };
    if let Some(secs) = output.and_then(|o| o.buffer_seconds) {
        out.buffer_seconds = secs;
    }
    if let Some(frames) = output.and_then(|o| o.chunk_frames) {
        out.chunk_frames = frames;
        playback.chunk_frames = frames;
    }
    if let Some(frames) = output.and_then(|o| o.refill_max_frames) {
        out.refill_max_frames = frames;
        playback.refill_max_frames = frames;
    }

    Ok(PipelineConfig {
        playback,
        output: out,
    })
}
