//! Output that discards audio, optionally at real-time speed.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

use super::{AudioOutput, OutputConfig, OutputPlugin};
use crate::audio_format::AudioFormat;

pub struct NullOutputPlugin;

impl OutputPlugin for NullOutputPlugin {
    fn name(&self) -> &'static str {
        "null"
    }

    fn create(&self, config: &OutputConfig) -> Result<Box<dyn AudioOutput>> {
        Ok(Box::new(NullOutput::new(config.sync)))
    }
}

#[derive(Debug)]
pub struct NullOutput {
    sync: bool,
    format: Option<AudioFormat>,
    clock: Option<(Instant, f64)>,
    played: f64,
}

impl NullOutput {
    pub fn new(sync: bool) -> Self {
        Self {
            sync,
            format: None,
            clock: None,
            played: 0.0,
        }
    }

    /// Seconds of audio accepted since the last open.
    pub fn played_seconds(&self) -> f64 {
        self.played
    }
}

impl AudioOutput for NullOutput {
    fn name(&self) -> &str {
        "null"
    }

    fn open(&mut self, format: AudioFormat) -> Result<()> {
        format.validate()?;
        self.format = Some(format);
        self.clock = None;
        self.played = 0.0;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.format.is_some()
    }

    fn play(&mut self, pcm: &[u8]) -> Result<()> {
        let format = self.format.ok_or_else(|| anyhow!("null output is closed"))?;
        let secs = format.duration_of(pcm.len()) as f64;
        if self.sync {
            let (start, base) = *self.clock.get_or_insert((Instant::now(), self.played));
            let due = start + Duration::from_secs_f64(self.played - base + secs);
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }
        self.played += secs;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.clock = None;
        Ok(())
    }

    fn cancel(&mut self) {
        self.clock = None;
    }

    fn close(&mut self) {
        self.format = None;
        self.clock = None;
    }
}
