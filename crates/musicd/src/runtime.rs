//! Daemon runtime: device and plugin listings, and playlist playback.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, never, select, tick};

use musicd_player::decoder::{DECODER_PLUGINS, DecoderRegistry};
use musicd_player::output::OUTPUT_PLUGINS;
use musicd_player::{Pipeline, PipelineConfig, PlayerEvent, Song, device};

use crate::playlist::Playlist;

/// Options of the `play` command.
#[derive(Clone, Debug)]
pub struct PlayOptions {
    pub paths: Vec<PathBuf>,
    pub repeat: bool,
    pub skip_errors: bool,
    pub status_interval: Option<Duration>,
}

/// Print output devices to stdout, marking the default with `*`.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    for d in device::list_devices(&host)? {
        let marker = if d.is_default { "*" } else { " " };
        println!(
            "{marker} {} ({}-{} Hz, up to {} ch)",
            d.name, d.min_rate, d.max_rate, d.max_channels
        );
    }
    Ok(())
}

/// Print built-in decoder and output plugins to stdout.
pub fn list_plugins() {
    println!("decoders:");
    for p in DECODER_PLUGINS {
        println!("  {} [{}]", p.name(), p.suffixes().join(" "));
    }
    println!("outputs:");
    for p in OUTPUT_PLUGINS {
        println!("  {}", p.name());
    }
}

fn song_for(path: &std::path::Path) -> Arc<Song> {
    Arc::new(Song::new(path.to_string_lossy().into_owned()))
}

/// Play `opts.paths` in order until the list ends or `interrupt` fires.
pub fn run_play(config: PipelineConfig, opts: PlayOptions, interrupt: Receiver<()>) -> Result<()> {
    if opts.paths.is_empty() {
        return Err(anyhow!("nothing to play"));
    }
    let songs = opts.paths.iter().map(|p| song_for(p)).collect();
    let pipeline = Pipeline::open(config, DecoderRegistry::builtin())?;
    let pc = pipeline.control().clone();
    let events = pipeline.events();
    let status_tick = opts.status_interval.map(tick).unwrap_or_else(never);

    let mut playlist = Playlist::new(songs, opts.repeat, opts.skip_errors);
    tracing::info!(songs = playlist.len(), repeat = opts.repeat, "playlist loaded");

    let result = (|| -> Result<()> {
        playlist.play(&pc, 0)?;
        loop {
            let step = select! {
                recv(events) -> ev => ev.map_or(Step::Done, Step::Event),
                recv(status_tick) -> _ => Step::Status,
                recv(interrupt) -> _ => {
                    tracing::info!("interrupted");
                    Step::Done
                }
            };
            match step {
                Step::Event(ev) => {
                    log_event(&ev);
                    if !playlist.handle_event(&pc, &ev)? {
                        return Ok(());
                    }
                }
                Step::Status => println!("{}", serde_json::to_string(&pc.status())?),
                Step::Done => return Ok(()),
            }
        }
    })();

    if let Some(message) = pc.error_message() {
        tracing::warn!(error = %message, "playback ended with error");
    }
    tracing::info!(played_seconds = pc.total_play_time(), "total play time");
    pipeline.shutdown()?;
    result
}

enum Step {
    Event(PlayerEvent),
    Status,
    Done,
}

fn log_event(ev: &PlayerEvent) {
    match ev {
        PlayerEvent::SongStarted(song) => tracing::info!(uri = %song.uri, "playing"),
        PlayerEvent::SongFinished(song) => tracing::info!(uri = %song.uri, "played"),
        PlayerEvent::State(state) => tracing::debug!(?state, "player state"),
        PlayerEvent::Queue(state) => tracing::debug!(?state, "queue state"),
        PlayerEvent::Error(error) => tracing::debug!(%error, "player error"),
    }
}
