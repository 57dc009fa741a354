//! Pipeline wiring: output buffer, both control blocks and both threads.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Result, anyhow};
use crossbeam_channel::Receiver;

use crate::config::PlaybackConfig;
use crate::decoder::{DecoderRegistry, spawn_decoder_thread};
use crate::decoder_control::DecoderControl;
use crate::output::{AudioOutput, OutputConfig, create_output};
use crate::output_buffer::OutputBuffer;
use crate::player::spawn_player_thread;
use crate::player_control::{PlayerControl, PlayerEvent};

/// Everything needed to assemble a pipeline.
#[derive(Clone, Debug, Default)]
pub struct PipelineConfig {
    pub playback: PlaybackConfig,
    pub output: OutputConfig,
}

/// A running decoder/player pair.
///
/// Dropping the handle without [`Pipeline::shutdown`] leaves both threads
/// running until the process exits.
pub struct Pipeline {
    pc: Arc<PlayerControl>,
    dc: Arc<DecoderControl>,
    buffer: Arc<OutputBuffer>,
    decoder: Option<JoinHandle<()>>,
    player: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Allocate the output buffer and control blocks and spawn the decoder
    /// and player threads writing to `output`.
    pub fn start(
        config: PipelineConfig,
        registry: DecoderRegistry,
        output: Box<dyn AudioOutput>,
    ) -> Result<Self> {
        let playback = Arc::new(config.playback);
        let capacity = playback.buffer_chunks();
        let buffer = Arc::new(OutputBuffer::new(capacity, playback.chunk_size));
        let bbp = playback.buffered_before_play_chunks(buffer.capacity());

        let dc = Arc::new(DecoderControl::new(
            buffer.decoder_notify().clone(),
            buffer.player_notify().clone(),
        ));
        let (pc, commands) = PlayerControl::new(
            buffer.clone(),
            bbp,
            playback.cross_fade,
            playback.software_volume,
        );
        let pc = Arc::new(pc);

        tracing::info!(
            chunks = buffer.capacity(),
            chunk_size = buffer.chunk_size(),
            buffered_before_play = bbp,
            output = output.name(),
            "pipeline starting"
        );

        let decoder = spawn_decoder_thread(
            dc.clone(),
            buffer.clone(),
            Arc::new(registry),
            playback.clone(),
        )?;
        let player = spawn_player_thread(pc.clone(), commands, dc.clone(), buffer.clone(), output)?;

        Ok(Self {
            pc,
            dc,
            buffer,
            decoder: Some(decoder),
            player: Some(player),
        })
    }

    /// Like [`Pipeline::start`], creating the output named in the config.
    pub fn open(config: PipelineConfig, registry: DecoderRegistry) -> Result<Self> {
        let output = create_output(&config.output)?;
        Self::start(config, registry, output)
    }

    /// Client handle of the player thread.
    pub fn control(&self) -> &Arc<PlayerControl> {
        &self.pc
    }

    pub fn decoder(&self) -> &Arc<DecoderControl> {
        &self.dc
    }

    pub fn buffer(&self) -> &Arc<OutputBuffer> {
        &self.buffer
    }

    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.pc.events()
    }

    /// Stop playback and join both threads.
    pub fn shutdown(mut self) -> Result<()> {
        if let Err(e) = self.pc.exit() {
            tracing::warn!("player exit: {e}");
        }
        let mut panicked = Vec::new();
        for (name, handle) in [("player", self.player.take()), ("decoder", self.decoder.take())] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    panicked.push(name);
                }
            }
        }
        tracing::info!("pipeline stopped");
        if panicked.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("{} thread panicked", panicked.join(" and ")))
        }
    }
}
