//! The decoder thread: waits for commands and runs one plugin per song.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use super::{DecoderApi, DecoderRegistry};
use crate::config::PlaybackConfig;
use crate::decoder_control::{
    DecodeError, DecoderCommand, DecoderCommandKind, DecoderControl, DecoderState,
};
use crate::output_buffer::OutputBuffer;
use crate::song::Song;

/// Spawn the decoder thread.
///
/// The thread runs until it receives QUIT or the control block is dropped.
pub fn spawn_decoder_thread(
    dc: Arc<DecoderControl>,
    buffer: Arc<OutputBuffer>,
    registry: Arc<DecoderRegistry>,
    config: Arc<PlaybackConfig>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("decoder".into())
        .spawn(move || {
            let _close = CloseOnExit(&dc);
            decoder_loop(&dc, &buffer, &registry, &config);
        })
        .context("spawn decoder thread")
}

struct CloseOnExit<'a>(&'a DecoderControl);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn decoder_loop(
    dc: &DecoderControl,
    buffer: &OutputBuffer,
    registry: &DecoderRegistry,
    config: &PlaybackConfig,
) {
    while let Some(cmd) = dc.wait_command() {
        match cmd {
            DecoderCommand::Start(song) => {
                dc.command_finished();
                run_song(dc, buffer, registry, config, &song);
            }
            DecoderCommand::Seek(_) => {
                // Nothing to seek in.
                dc.set_seek_error(true);
                dc.command_finished();
            }
            DecoderCommand::Stop => dc.command_finished(),
            DecoderCommand::Quit => {
                dc.command_finished();
                tracing::debug!("decoder thread exiting");
                return;
            }
        }
    }
}

fn run_song(
    dc: &DecoderControl,
    buffer: &OutputBuffer,
    registry: &DecoderRegistry,
    config: &PlaybackConfig,
    song: &Arc<Song>,
) {
    if let Some(path) = song.local_path() {
        if !path.exists() {
            tracing::warn!(uri = %song.uri, "file not found");
            fail(dc, DecodeError::NotFound);
            return;
        }
    }
    let Some(plugin) = registry.find_for(song) else {
        tracing::warn!(uri = %song.uri, "no decoder plugin");
        fail(dc, DecodeError::UnknownType);
        return;
    };

    tracing::info!(uri = %song.uri, plugin = plugin.name(), "decoding");
    let mut api = DecoderApi::new(dc, buffer, config);
    let result = plugin.decode(&mut api, song);

    match result {
        Err(e) if !api.is_initialized() => {
            tracing::warn!(uri = %song.uri, "decode failed: {e:#}");
            fail(dc, DecodeError::File(format!("{e:#}")));
            return;
        }
        Err(e) => tracing::warn!(uri = %song.uri, "decoder stopped early: {e:#}"),
        Ok(()) if !api.is_initialized() && dc.command() != DecoderCommandKind::Stop => {
            fail(
                dc,
                DecodeError::File("decoder produced no audio".to_string()),
            );
            return;
        }
        Ok(()) => {}
    }

    match api.finish() {
        Ok(DecoderCommandKind::None) => {}
        Ok(cmd) => tracing::debug!(uri = %song.uri, ?cmd, "tail dropped for pending command"),
        Err(e) => {
            tracing::warn!(uri = %song.uri, "flushing decoder output failed: {e:#}");
            buffer.flush();
        }
    }
    tracing::debug!(uri = %song.uri, "decoding finished");
    dc.set_state(DecoderState::Stop);
}

fn fail(dc: &DecoderControl, error: DecodeError) {
    dc.set_error(error);
    dc.set_state(DecoderState::Stop);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_format::AudioFormat;
    use crate::decoder::DecoderPlugin;

    struct Silence;

    impl DecoderPlugin for Silence {
        fn name(&self) -> &'static str {
            "silence"
        }

        fn suffixes(&self) -> &'static [&'static str] {
            &["sil"]
        }

        fn decode(&self, api: &mut DecoderApi<'_>, _song: &Song) -> Result<()> {
            api.initialized(AudioFormat::CD, false, Some(0.1))?;
            let pcm = vec![0u8; 1000];
            api.data(&pcm, 0.0, 0)?;
            Ok(())
        }
    }

    struct Broken;

    impl DecoderPlugin for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn suffixes(&self) -> &'static [&'static str] {
            &["bad"]
        }

        fn decode(&self, _api: &mut DecoderApi<'_>, _song: &Song) -> Result<()> {
            anyhow::bail!("corrupt header")
        }
    }

    fn setup() -> (Arc<DecoderControl>, Arc<OutputBuffer>, JoinHandle<()>) {
        let buffer = Arc::new(OutputBuffer::new(8, 256));
        let dc = Arc::new(DecoderControl::new(
            buffer.decoder_notify().clone(),
            buffer.player_notify().clone(),
        ));
        let mut registry = DecoderRegistry::new();
        registry.register(Arc::new(Silence));
        registry.register(Arc::new(Broken));
        let handle = spawn_decoder_thread(
            dc.clone(),
            buffer.clone(),
            Arc::new(registry),
            Arc::new(PlaybackConfig::default()),
        )
        .unwrap();
        (dc, buffer, handle)
    }

    fn wait_stopped(dc: &DecoderControl, buffer: &OutputBuffer) {
        while dc.state() != DecoderState::Stop {
            buffer.player_notify().wait();
        }
    }

    #[test]
    fn decodes_song_and_flushes_tail() {
        let (dc, buffer, handle) = setup();
        dc.start(Arc::new(Song::new("mem://tone.sil")));
        wait_stopped(&dc, &buffer);
        assert!(dc.error().is_none());
        assert_eq!(dc.out_format(), Some(AudioFormat::CD));
        // 1000 bytes over 256-byte chunks.
        assert_eq!(buffer.available(), 4);
        dc.quit().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn unknown_suffix_reports_unknown_type() {
        let (dc, buffer, handle) = setup();
        dc.start(Arc::new(Song::new("mem://track.xyz")));
        wait_stopped(&dc, &buffer);
        assert_eq!(dc.error(), Some(DecodeError::UnknownType));
        dc.quit().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn plugin_error_before_init_reports_file_error() {
        let (dc, buffer, handle) = setup();
        dc.start(Arc::new(Song::new("mem://track.bad")));
        wait_stopped(&dc, &buffer);
        assert!(matches!(dc.error(), Some(DecodeError::File(_))));
        dc.quit().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn missing_local_file_reports_not_found() {
        let (dc, buffer, handle) = setup();
        dc.start(Arc::new(Song::new("/nonexistent/dir/track.sil")));
        wait_stopped(&dc, &buffer);
        assert_eq!(dc.error(), Some(DecodeError::NotFound));
        dc.quit().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn dropped_thread_disconnects_control() {
        let (dc, _buffer, handle) = setup();
        dc.quit().unwrap();
        handle.join().unwrap();
        assert_eq!(dc.stop(), Err(crate::error::ControlError::Disconnected));
    }
}
