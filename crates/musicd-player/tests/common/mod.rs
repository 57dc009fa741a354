//! Synthetic decoder and capture output shared by the pipeline tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use crossbeam_channel::Receiver;
use musicd_player::decoder_control::DecoderCommandKind;
use musicd_player::{
    AudioFormat, AudioOutput, DecoderApi, DecoderPlugin, DecoderRegistry, Pipeline,
    PipelineConfig, PlaybackConfig, PlayerEvent, Song,
};

pub const CHUNK: usize = 256;
/// Frames per CHUNK at CD format.
pub const CHUNK_FRAMES: usize = CHUNK / 4;

/// A song the tone decoder can produce: `frames` stereo 16-bit frames of a
/// constant sample value.
#[derive(Clone, Copy, Debug)]
pub struct Tone {
    pub frames: usize,
    pub value: i16,
    pub fail: bool,
    pub seekable: bool,
    /// Report no total time.
    pub unknown_length: bool,
    /// Time spent opening the song before it reports its format.
    pub start_delay: Duration,
}

impl Tone {
    pub fn chunks(chunks: usize, value: i16) -> Self {
        Self {
            frames: chunks * CHUNK_FRAMES,
            value,
            fail: false,
            seekable: true,
            unknown_length: false,
            start_delay: Duration::ZERO,
        }
    }

    pub fn seconds(secs: f32, value: i16) -> Self {
        Self {
            frames: (secs * 44_100.0) as usize,
            ..Self::chunks(0, value)
        }
    }

    pub fn broken() -> Self {
        Self {
            fail: true,
            ..Self::chunks(0, 0)
        }
    }

    pub fn unseekable(self) -> Self {
        Self {
            seekable: false,
            ..self
        }
    }

    pub fn without_length(self) -> Self {
        Self {
            unknown_length: true,
            ..self
        }
    }

    pub fn delayed(self, start_delay: Duration) -> Self {
        Self {
            start_delay,
            ..self
        }
    }
}

/// Decoder plugin for `mem://<name>.tone` URIs.
#[derive(Default)]
pub struct ToneDecoder {
    songs: HashMap<String, Tone>,
}

impl ToneDecoder {
    pub fn with(mut self, uri: &str, tone: Tone) -> Self {
        self.songs.insert(uri.to_string(), tone);
        self
    }
}

impl DecoderPlugin for ToneDecoder {
    fn name(&self) -> &'static str {
        "tone"
    }

    fn suffixes(&self) -> &'static [&'static str] {
        &["tone"]
    }

    fn decode(&self, api: &mut DecoderApi<'_>, song: &Song) -> Result<()> {
        let Some(tone) = self.songs.get(&song.uri).copied() else {
            bail!("no tone registered for {}", song.uri);
        };
        if tone.fail {
            bail!("corrupt header");
        }
        if !tone.start_delay.is_zero() {
            thread::sleep(tone.start_delay);
        }
        let format = AudioFormat::CD;
        let total = (!tone.unknown_length).then(|| tone.frames as f32 / 44_100.0);
        api.initialized(format, tone.seekable, total)?;

        let block: Vec<u8> = std::iter::repeat_n(tone.value.to_ne_bytes(), 2 * CHUNK_FRAMES)
            .flatten()
            .collect();
        let mut pos = 0usize;
        while pos < tone.frames {
            match api.command() {
                DecoderCommandKind::Stop => return Ok(()),
                DecoderCommandKind::Seek => {
                    pos = ((api.seek_where() * 44_100.0) as usize).min(tone.frames);
                    api.command_finished();
                    continue;
                }
                _ => {}
            }
            let frames = CHUNK_FRAMES.min(tone.frames - pos);
            let time = pos as f32 / 44_100.0;
            match api.data(&block[..frames * 4], time, 1411)? {
                DecoderCommandKind::Stop => return Ok(()),
                DecoderCommandKind::Seek => continue,
                _ => pos += frames,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Captured {
    pub pcm: Vec<u8>,
    pub opened: Vec<AudioFormat>,
    pub open: bool,
    pub paused: bool,
    pub cancels: usize,
}

/// Output recording everything it plays, sleeping `pace` per write.
#[derive(Clone)]
pub struct Capture {
    pub log: Arc<Mutex<Captured>>,
    pace: Arc<Mutex<Duration>>,
    fail_open: bool,
}

impl Capture {
    pub fn new(pace: Duration) -> Self {
        Self {
            log: Arc::new(Mutex::new(Captured::default())),
            pace: Arc::new(Mutex::new(pace)),
            fail_open: false,
        }
    }

    /// Change the per-write sleep, also for clones handed to a pipeline.
    pub fn set_pace(&self, pace: Duration) {
        *self.pace.lock().unwrap() = pace;
    }

    pub fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new(Duration::ZERO)
        }
    }

    pub fn pcm_len(&self) -> usize {
        self.log.lock().unwrap().pcm.len()
    }

    pub fn samples(&self) -> Vec<i16> {
        self.log
            .lock()
            .unwrap()
            .pcm
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect()
    }
}

impl AudioOutput for Capture {
    fn name(&self) -> &str {
        "capture"
    }

    fn open(&mut self, format: AudioFormat) -> Result<()> {
        if self.fail_open {
            bail!("device busy");
        }
        let mut log = self.log.lock().unwrap();
        log.opened.push(format);
        log.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.log.lock().unwrap().open
    }

    fn play(&mut self, pcm: &[u8]) -> Result<()> {
        self.log.lock().unwrap().pcm.extend_from_slice(pcm);
        let pace = *self.pace.lock().unwrap();
        if !pace.is_zero() {
            thread::sleep(pace);
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.log.lock().unwrap().paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.log.lock().unwrap().paused = false;
        Ok(())
    }

    fn cancel(&mut self) {
        self.log.lock().unwrap().cancels += 1;
    }

    fn close(&mut self) {
        self.log.lock().unwrap().open = false;
    }
}

pub fn playback_config() -> PlaybackConfig {
    PlaybackConfig {
        buffer_seconds: 0.05,
        buffer_before_play: 10.0,
        chunk_size: CHUNK,
        ..PlaybackConfig::default()
    }
}

pub fn start(playback: PlaybackConfig, tones: ToneDecoder, capture: &Capture) -> Pipeline {
    let mut registry = DecoderRegistry::new();
    registry.register(Arc::new(tones));
    let config = PipelineConfig {
        playback,
        ..PipelineConfig::default()
    };
    Pipeline::start(config, registry, Box::new(capture.clone())).unwrap()
}

pub fn song(uri: &str) -> Arc<Song> {
    Arc::new(Song::new(uri))
}

/// Receive events until `pred` matches one, failing after five seconds.
pub fn wait_for(events: &Receiver<PlayerEvent>, pred: impl Fn(&PlayerEvent) -> bool) -> PlayerEvent {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(left) {
            Ok(ev) if pred(&ev) => return ev,
            Ok(_) => {}
            Err(e) => panic!("event not received: {e}"),
        }
    }
}

/// Poll `cond` until it holds, failing after five seconds.
pub fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached");
        thread::sleep(Duration::from_millis(2));
    }
}
