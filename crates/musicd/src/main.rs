//! musicd: a music playback daemon.
//!
//! ## Pipeline
//! 1. **Decode**: the decoder thread fills a chunked output buffer in one PCM format.
//! 2. **Play**: the player thread drains the buffer into an output plugin, handing off to the
//!    queued song without a gap or cross-fading into it.
//! 3. **Output**: the `cpal` plugin resamples to the device rate and feeds the callback from a
//!    bounded queue; the `null` plugin discards audio.
//!
//! The playlist drives the player through its queue handshake and ends when the list does.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use musicd::cli::{self, Args, Command};
use musicd::config::{self, DaemonConfig};
use musicd::runtime::{self, PlayOptions};

fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.verbose {
        "info,musicd=debug,musicd_player=debug"
    } else {
        "info,musicd=info,musicd_player=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match &args.cmd {
        Command::ListDevices => runtime::list_devices(),
        Command::ListPlugins => {
            runtime::list_plugins();
            Ok(())
        }
        Command::Play {
            paths,
            repeat,
            skip_errors,
            status_interval,
        } => {
            let cfg = DaemonConfig::resolve(args.config.as_deref())?;
            let pipeline = config::pipeline_config(&cfg, &args.overrides())?;

            let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
            if let Err(e) = ctrlc::set_handler(move || {
                let _ = interrupt_tx.try_send(());
            }) {
                tracing::warn!("ctrl-c handler not installed: {e}");
            }

            runtime::run_play(
                pipeline,
                PlayOptions {
                    paths: paths.clone(),
                    repeat: *repeat,
                    skip_errors: *skip_errors,
                    status_interval: cli::status_interval(*status_interval),
                },
                interrupt_rx,
            )
        }
    }
}
