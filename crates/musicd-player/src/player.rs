//! The player thread.
//!
//! Idle, it blocks on the command channel. While a song plays it runs the
//! play loop: drain client commands, wait for the buffer to fill, hand the
//! queued song to the decoder when the current one is fully decoded, mix the
//! tail of the current song with the head of the next one, and write chunks
//! to the output. All waits go through the output buffer's player notify,
//! which the decoder, the buffer and [`PlayerControl`] all signal.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::TryRecvError;
use musicd_types::{PlayerError, PlayerState, QueueLockState, QueueState};

use crate::audio_format::AudioFormat;
use crate::crossfade::cross_fade_calc;
use crate::decoder_control::{DecodeError, DecoderControl, DecoderState};
use crate::error::ControlError;
use crate::output::AudioOutput;
use crate::output_buffer::{Chunk, OutputBuffer};
use crate::pcm::pcm_volume;
use crate::player_control::{
    PlayerCommand, PlayerCommands, PlayerControl, PlayerEvent, PlayerRequest,
};
use crate::song::Song;

/// Spawn the player thread.
///
/// The thread runs until it receives [`PlayerCommand::Exit`].
pub fn spawn_player_thread(
    pc: Arc<PlayerControl>,
    commands: PlayerCommands,
    dc: Arc<DecoderControl>,
    buffer: Arc<OutputBuffer>,
    output: Box<dyn AudioOutput>,
) -> Result<JoinHandle<()>> {
    let spare = Chunk::new(buffer.chunk_size());
    let player = Player {
        pc,
        commands,
        dc,
        buffer,
        output,
        spare,
        pending: None,
    };
    thread::Builder::new()
        .name("player".into())
        .spawn(move || player.run())
        .context("spawn player thread")
}

pub(crate) fn player_error(error: &DecodeError) -> PlayerError {
    match error {
        DecodeError::NotFound => PlayerError::FileNotFound,
        DecodeError::UnknownType => PlayerError::UnknownType,
        DecodeError::File(_) => PlayerError::File,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fade {
    /// Not decided yet for the coming transition.
    Unknown,
    Disabled,
    Enabled,
}

/// What the play loop does after handling commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    /// Playback position changed; refill before playing on.
    Seeked,
    /// Playback ended; the decoder is already stopped.
    Quit,
}

/// Per-song state of the play loop.
struct Playback {
    song: Arc<Song>,
    format: AudioFormat,
    buffering: bool,
    /// Ring index where the queued song's audio starts.
    next: Option<usize>,
    fade: Fade,
    fade_chunks: usize,
    fade_started: bool,
}

impl Playback {
    fn new(song: Arc<Song>, format: AudioFormat) -> Self {
        Self {
            song,
            format,
            buffering: true,
            next: None,
            fade: Fade::Unknown,
            fade_chunks: 0,
            fade_started: false,
        }
    }

    fn reset_transition(&mut self) {
        self.next = None;
        self.fade = Fade::Unknown;
        self.fade_chunks = 0;
        self.fade_started = false;
    }
}

struct Player {
    pc: Arc<PlayerControl>,
    commands: PlayerCommands,
    dc: Arc<DecoderControl>,
    buffer: Arc<OutputBuffer>,
    output: Box<dyn AudioOutput>,
    spare: Chunk,
    /// A request received mid-playback that the idle loop must handle.
    pending: Option<PlayerRequest>,
}

impl Player {
    fn run(mut self) {
        loop {
            let req = match self.pending.take() {
                Some(req) => req,
                None => match self.commands.recv() {
                    Ok(req) => req,
                    Err(_) => break,
                },
            };
            match req.cmd.clone() {
                PlayerCommand::Play(song) => self.play(song, req),
                PlayerCommand::Stop => {
                    self.output.cancel();
                    req.finish(Ok(()));
                }
                PlayerCommand::Pause => req.finish(Ok(())),
                PlayerCommand::Seek(..) => req.finish(Err(ControlError::NotPlaying)),
                PlayerCommand::CloseAudio => {
                    self.output.close();
                    req.finish(Ok(()));
                }
                PlayerCommand::LockQueue => {
                    self.pc.set_queue_lock(QueueLockState::Locked);
                    req.finish(Ok(()));
                }
                PlayerCommand::UnlockQueue => {
                    self.pc.set_queue_lock(QueueLockState::Unlocked);
                    req.finish(Ok(()));
                }
                PlayerCommand::Exit => {
                    self.shutdown();
                    req.finish(Ok(()));
                    return;
                }
            }
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.dc.quit() {
            tracing::debug!("decoder already gone: {e}");
        }
        self.output.close();
        tracing::debug!("player thread exiting");
    }

    fn wait(&self) {
        self.buffer.player_notify().wait();
    }

    /// Start `song` and play until the queue runs dry, an error occurs or a
    /// client stops playback.
    fn play(&mut self, song: Arc<Song>, req: PlayerRequest) {
        self.buffer.clear();
        self.pc.clear_error();
        self.dc.start(song.clone());
        req.finish(Ok(()));

        let format = match self.wait_on_decode(&song) {
            Ok(format) => format,
            Err(()) => {
                self.quit_decode();
                return;
            }
        };
        self.pc.set_state(PlayerState::Play);
        self.pc.set_song(song.clone(), self.dc.total_time(), format);
        let mut pb = Playback::new(song, format);

        if self.play_loop(&mut pb) {
            self.quit_decode();
        }
    }

    /// Wait until the decoder leaves START, then open the output for the
    /// negotiated format. Errors are recorded on the player control.
    fn wait_on_decode(&mut self, song: &Arc<Song>) -> Result<AudioFormat, ()> {
        while self.dc.state() == DecoderState::Start {
            self.wait();
        }
        if let Some(e) = self.dc.error() {
            tracing::warn!(uri = %song.uri, error = %e, "decode failed");
            self.pc.set_error(player_error(&e), Some(song.clone()));
            return Err(());
        }
        let Some(format) = self.dc.out_format() else {
            self.pc.set_error(PlayerError::File, Some(song.clone()));
            return Err(());
        };
        if let Err(e) = self.output.open(format) {
            tracing::warn!(output = self.output.name(), %format, "open failed: {e:#}");
            self.pc.set_error(PlayerError::Audio, Some(song.clone()));
            return Err(());
        }
        Ok(format)
    }

    /// Stop the decoder and return to the STOP state.
    fn quit_decode(&mut self) {
        if let Err(e) = self.dc.stop() {
            tracing::warn!("stopping decoder failed: {e}");
        }
        self.buffer.clear();
        self.pc.set_state(PlayerState::Stop);
        self.pc.clear_song();
    }

    /// Returns `true` when the caller still has to stop the decoder.
    fn play_loop(&mut self, pb: &mut Playback) -> bool {
        let bbp = self.pc.buffered_before_play();

        loop {
            match self.process_input(pb) {
                Flow::Continue => {}
                Flow::Seeked => continue,
                Flow::Quit => return false,
            }

            if pb.buffering {
                if self.buffer.available() < bbp && self.dc.state() != DecoderState::Stop {
                    self.wait();
                    continue;
                }
                pb.buffering = false;
            }

            if self.dc.state() == DecoderState::Stop
                && pb.next.is_none()
                && self.pc.queue_state() == QueueState::Full
                && self.pc.queue_lock() == QueueLockState::Unlocked
            {
                if let Some(next_song) = self.pc.next_song() {
                    pb.next = Some(self.buffer.end());
                    tracing::debug!(uri = %next_song.uri, "decoding next song");
                    self.dc.start(next_song);
                    self.pc.advance_queue(QueueState::Decode);
                }
            }

            if pb.next.is_some()
                && pb.fade == Fade::Unknown
                && self.dc.state() != DecoderState::Start
            {
                pb.fade = self.decide_fade(pb, bbp);
            }
            if pb.fade == Fade::Unknown && self.fade_pending(pb, bbp) {
                self.wait();
                continue;
            }

            if self.pc.state() == PlayerState::Pause {
                self.wait();
                continue;
            }

            let begin = self.buffer.begin();
            if self.buffer.available() > 0 && pb.next != Some(begin) {
                if pb.fade == Fade::Enabled && !self.mix_fade_chunk(pb) {
                    continue;
                }
                if !self.play_head(pb) {
                    return false;
                }
            } else if pb.next == Some(begin) {
                match self.cross_border(pb) {
                    Flow::Continue | Flow::Seeked => {}
                    Flow::Quit => return true,
                }
            } else if self.dc.state() == DecoderState::Stop {
                if self.pc.queue_state() == QueueState::Full
                    && self.pc.queue_lock() == QueueLockState::Locked
                {
                    self.wait();
                    continue;
                }
                tracing::debug!(uri = %pb.song.uri, "playback finished");
                self.output.drain();
                return true;
            } else if self.output.wants_silence() {
                if !self.play_silence(pb) {
                    return false;
                }
            } else {
                self.wait();
            }
        }
    }

    fn decide_fade(&self, pb: &mut Playback, bbp: usize) -> Fade {
        let Some(next_format) = self.dc.out_format() else {
            return Fade::Disabled;
        };
        if self.dc.state() == DecoderState::Stop && self.dc.error().is_some() {
            return Fade::Disabled;
        }
        let chunks = cross_fade_calc(
            self.pc.cross_fade(),
            self.dc.total_time(),
            &next_format,
            &pb.format,
            fade_window(self.buffer.capacity(), bbp),
            self.buffer.chunk_size(),
        );
        if chunks == 0 {
            return Fade::Disabled;
        }
        tracing::debug!(chunks, "cross-fade armed");
        pb.fade_chunks = chunks;
        Fade::Enabled
    }

    /// The queued song is still starting and the border is already inside
    /// the fade its length would allow at the current format.
    fn fade_pending(&self, pb: &Playback, bbp: usize) -> bool {
        let Some(next) = pb.next else {
            return false;
        };
        if self.dc.state() != DecoderState::Start {
            return false;
        }
        let estimate = cross_fade_calc(
            self.pc.cross_fade(),
            None,
            &pb.format,
            &pb.format,
            fade_window(self.buffer.capacity(), bbp),
            self.buffer.chunk_size(),
        );
        estimate > 0 && self.buffer.relative(next) <= estimate
    }

    /// Mix the head chunk with its counterpart in the next song when the
    /// border is within the fade window. Returns `false` when the loop must
    /// wait for the decoder first.
    fn mix_fade_chunk(&mut self, pb: &mut Playback) -> bool {
        let Some(next) = pb.next else {
            return true;
        };
        let position = self.buffer.relative(next);
        if position > pb.fade_chunks {
            return true;
        }
        if !pb.fade_started {
            pb.fade_chunks = position;
            pb.fade_started = true;
        }
        let n = pb.fade_chunks as u32;
        let k = (pb.fade_chunks - position) as u32;
        if self.buffer.cross_fade_head(pb.fade_chunks, k, n, &pb.format) {
            return true;
        }
        if self.dc.state() == DecoderState::Stop {
            tracing::debug!("next song too short, cross-fade abandoned");
            pb.fade = Fade::Disabled;
            return true;
        }
        self.wait();
        false
    }

    /// Play and drop the head chunk. Returns `false` on output failure.
    fn play_head(&mut self, pb: &Playback) -> bool {
        if !self.buffer.take_head(&mut self.spare) {
            return true;
        }
        self.pc
            .set_progress(self.spare.time(), self.spare.bit_rate());
        pcm_volume(
            self.spare.data_mut(),
            &pb.format,
            self.pc.software_volume(),
        );
        self.write(pb)
    }

    fn play_silence(&mut self, pb: &Playback) -> bool {
        self.spare.set_silence(self.buffer.chunk_size());
        self.write(pb)
    }

    fn write(&mut self, pb: &Playback) -> bool {
        match self.output.play(self.spare.data()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(output = self.output.name(), "write failed: {e:#}");
                self.pc.set_error(PlayerError::Audio, Some(pb.song.clone()));
                self.quit_decode();
                false
            }
        }
    }

    /// The head reached the first chunk of the queued song.
    fn cross_border(&mut self, pb: &mut Playback) -> Flow {
        if pb.fade == Fade::Enabled && pb.fade_started {
            self.buffer.skip(pb.fade_chunks);
        }
        self.pc.emit(PlayerEvent::SongFinished(pb.song.clone()));

        while self.pc.queue_state() == QueueState::Decode
            || self.pc.queue_lock() == QueueLockState::Locked
        {
            match self.process_input(pb) {
                Flow::Continue => self.wait(),
                Flow::Seeked => return Flow::Seeked,
                Flow::Quit => return Flow::Quit,
            }
        }
        if self.pc.queue_state() != QueueState::Play {
            tracing::debug!("no song to continue with");
            return Flow::Quit;
        }

        let Some(song) = self.pc.next_song() else {
            return Flow::Quit;
        };
        let format = match self.wait_on_decode(&song) {
            Ok(format) => format,
            Err(()) => return Flow::Quit,
        };
        tracing::info!(uri = %song.uri, "next song");
        pb.reset_transition();
        pb.song = song.clone();
        pb.format = format;
        self.pc.advance_queue(QueueState::Empty);
        self.pc.set_song(song, self.dc.total_time(), format);
        Flow::Continue
    }

    /// Handle every queued client request without blocking.
    fn process_input(&mut self, pb: &mut Playback) -> Flow {
        let mut flow = Flow::Continue;
        loop {
            let req = match self.commands.try_recv() {
                Ok(req) => req,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return flow,
            };
            match req.cmd.clone() {
                PlayerCommand::Stop => {
                    self.output.cancel();
                    self.quit_decode();
                    req.finish(Ok(()));
                    return Flow::Quit;
                }
                PlayerCommand::Play(_) | PlayerCommand::CloseAudio | PlayerCommand::Exit => {
                    self.output.cancel();
                    self.quit_decode();
                    self.pending = Some(req);
                    return Flow::Quit;
                }
                PlayerCommand::Pause => {
                    self.toggle_pause();
                    req.finish(Ok(()));
                }
                PlayerCommand::Seek(song, t) => {
                    let (f, result) = self.seek(pb, song, t);
                    req.finish(result);
                    match f {
                        Flow::Quit => return Flow::Quit,
                        Flow::Seeked => flow = Flow::Seeked,
                        Flow::Continue => {}
                    }
                }
                PlayerCommand::LockQueue => {
                    self.pc.set_queue_lock(QueueLockState::Locked);
                    req.finish(Ok(()));
                }
                PlayerCommand::UnlockQueue => {
                    self.pc.set_queue_lock(QueueLockState::Unlocked);
                    req.finish(Ok(()));
                }
            }
        }
    }

    fn toggle_pause(&mut self) {
        let result = if self.pc.state() == PlayerState::Pause {
            self.pc.set_state(PlayerState::Play);
            self.output.resume()
        } else {
            self.pc.set_state(PlayerState::Pause);
            self.output.pause()
        };
        if let Err(e) = result {
            tracing::warn!(output = self.output.name(), "pause toggle failed: {e:#}");
        }
    }

    /// Seek to `t` in `song`, restarting the decoder on it if it is not the
    /// song being decoded.
    ///
    /// Once the decoder was restarted the position has moved even when the
    /// seek itself fails, so the flow is [`Flow::Seeked`] alongside the error.
    fn seek(
        &mut self,
        pb: &mut Playback,
        song: Arc<Song>,
        t: f32,
    ) -> (Flow, Result<(), ControlError>) {
        let restart = self.dc.state() == DecoderState::Stop
            || self.dc.error().is_some()
            || pb.next.is_some()
            || !self.dc.is_current_song(&song);
        if restart {
            tracing::debug!(uri = %song.uri, "restarting decoder for seek");
            if let Err(e) = self.dc.stop() {
                return (Flow::Continue, Err(e));
            }
            self.buffer.clear();
            self.dc.start(song.clone());
            let format = match self.wait_on_decode(&song) {
                Ok(format) => format,
                Err(()) => {
                    self.quit_decode();
                    return (Flow::Quit, Ok(()));
                }
            };
            if Arc::ptr_eq(&song, &pb.song) {
                self.pc.seeked(0.0);
            } else {
                self.pc.set_song(song.clone(), self.dc.total_time(), format);
            }
            pb.song = song;
            pb.format = format;
            self.rewind(pb);
        }
        let flow = if restart { Flow::Seeked } else { Flow::Continue };

        let total = self.dc.total_time();
        let mut target = t.max(0.0);
        if let Some(total) = total {
            target = target.min((total - 1.0).max(0.0));
        }
        if let Err(e) = self.dc.seek(target as f64) {
            tracing::debug!(uri = %pb.song.uri, target, "seek failed: {e}");
            return (flow, Err(e));
        }

        if !restart {
            self.rewind(pb);
        }
        self.pc.seeked(target);
        tracing::debug!(uri = %pb.song.uri, target, "seeked");
        (Flow::Seeked, Ok(()))
    }

    /// Forget the queued song's border and refill from the new position.
    fn rewind(&mut self, pb: &mut Playback) {
        pb.reset_transition();
        if self.pc.queue_state() == QueueState::Decode {
            self.pc.advance_queue(QueueState::Full);
        }
        self.output.cancel();
        pb.buffering = true;
    }
}

/// Largest cross-fade, in chunks, a ring of `capacity` can carry.
///
/// The chunks kept for `buffered_before_play` are excluded, and the mix needs
/// the head plus its partner `n` chunks later visible at once.
fn fade_window(capacity: usize, bbp: usize) -> usize {
    capacity
        .saturating_sub(bbp)
        .min(capacity.saturating_sub(2))
}
