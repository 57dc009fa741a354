//! Audio outputs: where the player thread writes PCM.

pub mod cpal_output;
pub mod null;

use anyhow::{Result, anyhow};

use crate::audio_format::AudioFormat;

/// A sink for PCM in the buffer format.
///
/// `play` may block; that is what paces the player thread to the device.
pub trait AudioOutput: Send {
    fn name(&self) -> &str;

    /// Open (or reopen) the device for `format`.
    fn open(&mut self, format: AudioFormat) -> Result<()>;

    fn is_open(&self) -> bool;

    fn play(&mut self, pcm: &[u8]) -> Result<()>;

    /// Stop consuming audio, keeping what is queued.
    fn pause(&mut self) -> Result<()> {
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    /// Drop audio queued but not yet heard.
    fn cancel(&mut self) {}

    /// Wait for queued audio to be heard.
    fn drain(&mut self) {}

    fn close(&mut self);

    /// Whether the player should feed silence while the decoder lags.
    fn wants_silence(&self) -> bool {
        false
    }
}

/// Settings handed to an [`OutputPlugin`].
#[derive(Clone, Debug, Default)]
pub struct OutputConfig {
    /// Plugin name; `cpal` if unset.
    pub plugin: Option<String>,
    /// Device name substring for device-backed outputs.
    pub device: Option<String>,
    /// Pace non-device outputs to real time.
    pub sync: bool,
    /// Device-side queue length in seconds.
    pub buffer_seconds: f32,
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per callback refill.
    pub refill_max_frames: usize,
}

pub trait OutputPlugin: Sync {
    fn name(&self) -> &'static str;

    fn create(&self, config: &OutputConfig) -> Result<Box<dyn AudioOutput>>;
}

/// Built-in output plugins, in lookup order.
pub static OUTPUT_PLUGINS: &[&dyn OutputPlugin] =
    &[&cpal_output::CpalOutputPlugin, &null::NullOutputPlugin];

pub fn find_output_plugin(name: &str) -> Option<&'static dyn OutputPlugin> {
    OUTPUT_PLUGINS
        .iter()
        .copied()
        .find(|p| p.name().eq_ignore_ascii_case(name))
}

/// Create the output named by `config.plugin` (default `cpal`).
pub fn create_output(config: &OutputConfig) -> Result<Box<dyn AudioOutput>> {
    let name = config.plugin.as_deref().unwrap_or("cpal");
    let plugin =
        find_output_plugin(name).ok_or_else(|| anyhow!("unknown output plugin: {name}"))?;
    tracing::info!(plugin = plugin.name(), device = ?config.device, "creating output");
    plugin.create(config)
}
