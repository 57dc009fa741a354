use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::Overrides;

#[derive(Parser, Debug)]
#[command(name = "musicd", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Config file (defaults to musicd.toml next to the executable)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Output plugin (cpal, null)
    #[arg(long)]
    pub output: Option<String>,

    /// Cross-fade duration in seconds (0 disables)
    #[arg(long)]
    pub crossfade: Option<f32>,

    /// Output buffer length in seconds
    #[arg(long)]
    pub buffer_seconds: Option<f32>,

    /// ReplayGain mode: off, track or album
    #[arg(long)]
    pub replay_gain: Option<String>,

    /// Software volume, 0..=1000
    #[arg(long)]
    pub volume: Option<u16>,

    /// Debug logging for the musicd crates
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play files in order
    Play {
        /// Audio files or URIs
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Start over after the last song
        #[arg(long)]
        repeat: bool,

        /// Keep going after a song fails to play
        #[arg(long)]
        skip_errors: bool,

        /// Print a JSON status line every N seconds
        #[arg(long)]
        status_interval: Option<f32>,
    },

    /// List output devices and exit
    ListDevices,

    /// List decoder and output plugins and exit
    ListPlugins,
}

impl Args {
    /// Settings given on the command line, applied over the config file.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            device: self.device.clone(),
            output: self.output.clone(),
            crossfade: self.crossfade,
            buffer_seconds: self.buffer_seconds,
            replay_gain: self.replay_gain.clone(),
            volume: self.volume,
        }
    }
}

/// Status line period for `--status-interval`; `None` when the value is
/// not a positive duration.
pub fn status_interval(secs: Option<f32>) -> Option<Duration> {
    secs.filter(|s| *s > 0.0)
        .and_then(|s| Duration::try_from_secs_f32(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_with_flags() {
        let args = Args::try_parse_from([
            "musicd",
            "--crossfade",
            "2.5",
            "--output",
            "null",
            "play",
            "a.flac",
            "b.mp3",
            "--repeat",
        ])
        .unwrap();
        let Command::Play { paths, repeat, .. } = &args.cmd else {
            panic!("expected play");
        };
        assert_eq!(paths.len(), 2);
        assert!(*repeat);
        let o = args.overrides();
        assert_eq!(o.crossfade, Some(2.5));
        assert_eq!(o.output.as_deref(), Some("null"));
    }

    #[test]
    fn play_requires_a_path() {
        assert!(Args::try_parse_from(["musicd", "play"]).is_err());
    }

    #[test]
    fn status_interval_rejects_unusable_values() {
        assert_eq!(status_interval(None), None);
        assert_eq!(status_interval(Some(0.0)), None);
        assert_eq!(status_interval(Some(-1.0)), None);
        assert_eq!(status_interval(Some(f32::INFINITY)), None);
        assert_eq!(status_interval(Some(f32::NAN)), None);
        assert_eq!(status_interval(Some(1.5)), Some(Duration::from_millis(1500)));
    }
}
