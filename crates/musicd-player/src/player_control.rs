//! Client-facing handle of the player thread.
//!
//! Requests travel as [`PlayerCommand`] messages with a reply channel; every
//! request blocks its caller until the player thread answers. Status fields
//! live behind one mutex, volume and cross-fade in atomics so the play loop
//! can read them per chunk. State and queue transitions are broadcast as
//! [`PlayerEvent`]s.

use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use musicd_types::{PlayerError, PlayerState, PlayerStatus, QueueLockState, QueueState};

use crate::audio_format::AudioFormat;
use crate::error::ControlError;
use crate::notify::{Notify, lock};
use crate::output_buffer::OutputBuffer;
use crate::pcm::VOLUME_MAX;
use crate::song::Song;

#[derive(Clone, Debug)]
pub enum PlayerCommand {
    Play(Arc<Song>),
    Stop,
    Pause,
    Seek(Arc<Song>, f32),
    CloseAudio,
    LockQueue,
    UnlockQueue,
    Exit,
}

#[derive(Clone, Debug)]
pub enum PlayerEvent {
    State(PlayerState),
    Queue(QueueState),
    Error(PlayerError),
    SongStarted(Arc<Song>),
    SongFinished(Arc<Song>),
}

/// A command together with the channel its result goes back on.
#[derive(Debug)]
pub struct PlayerRequest {
    pub cmd: PlayerCommand,
    reply: Sender<Result<(), ControlError>>,
}

impl PlayerRequest {
    pub fn finish(self, result: Result<(), ControlError>) {
        // The caller may have given up waiting.
        let _ = self.reply.send(result);
    }
}

/// Receiving end of the command channel, owned by the player thread.
///
/// Dropping it makes every pending and future request fail with
/// [`ControlError::Disconnected`].
pub type PlayerCommands = Receiver<PlayerRequest>;

#[derive(Debug, Default)]
struct PlayerShared {
    state: PlayerState,
    queue_state: QueueState,
    queue_lock: QueueLockState,
    next_song: Option<Arc<Song>>,
    song: Option<Arc<Song>>,
    error: Option<PlayerError>,
    errored_song: Option<Arc<Song>>,
    elapsed: f32,
    total: Option<f32>,
    bit_rate: u16,
    audio_format: Option<AudioFormat>,
    total_play_time: f64,
    begin_time: f32,
}

#[derive(Debug)]
pub struct PlayerControl {
    cmd_tx: Sender<PlayerRequest>,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
    client: Mutex<()>,
    notify: Arc<Notify>,
    buffer: Arc<OutputBuffer>,
    buffered_before_play: usize,
    software_volume: AtomicU16,
    cross_fade: AtomicU32,
    shared: Mutex<PlayerShared>,
}

impl PlayerControl {
    /// Create the control block for a player reading `buffer`.
    ///
    /// The returned receiver must be handed to the player thread.
    pub fn new(
        buffer: Arc<OutputBuffer>,
        buffered_before_play: usize,
        cross_fade: f32,
        software_volume: u16,
    ) -> (Self, PlayerCommands) {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let pc = Self {
            cmd_tx,
            events_tx,
            events_rx,
            client: Mutex::new(()),
            notify: buffer.player_notify().clone(),
            buffered_before_play,
            buffer,
            software_volume: AtomicU16::new(software_volume.min(VOLUME_MAX)),
            cross_fade: AtomicU32::new(sanitize_cross_fade(cross_fade).to_bits()),
            shared: Mutex::new(PlayerShared::default()),
        };
        (pc, cmd_rx)
    }

    fn request(&self, cmd: PlayerCommand) -> Result<(), ControlError> {
        let _client = lock(&self.client);
        let (reply, rx) = crossbeam_channel::bounded(1);
        tracing::debug!(?cmd, "player command");
        self.cmd_tx
            .send(PlayerRequest { cmd, reply })
            .map_err(|_| ControlError::Disconnected)?;
        self.notify.signal();
        rx.recv().map_err(|_| ControlError::Disconnected)?
    }

    /// Stop whatever is playing and start `song`.
    pub fn play(&self, song: Arc<Song>) -> Result<(), ControlError> {
        self.stop()?;
        self.request(PlayerCommand::Play(song))
    }

    /// Stop playback and forget the queued song.
    pub fn stop(&self) -> Result<(), ControlError> {
        self.request(PlayerCommand::Stop)?;
        let mut sh = lock(&self.shared);
        sh.queue_state = QueueState::Blank;
        sh.queue_lock = QueueLockState::Unlocked;
        sh.next_song = None;
        Ok(())
    }

    /// Toggle between PLAY and PAUSE. No-op while stopped.
    pub fn pause(&self) -> Result<(), ControlError> {
        if self.state() == PlayerState::Stop {
            return Ok(());
        }
        self.request(PlayerCommand::Pause)
    }

    pub fn set_pause(&self, pause: bool) -> Result<(), ControlError> {
        match self.state() {
            PlayerState::Play if pause => self.pause(),
            PlayerState::Pause if !pause => self.pause(),
            _ => Ok(()),
        }
    }

    /// Seek to `t` seconds in `song`, starting it if another song is playing.
    pub fn seek(&self, song: Arc<Song>, t: f32) -> Result<(), ControlError> {
        if self.state() == PlayerState::Stop {
            return Err(ControlError::NotPlaying);
        }
        if self.error().is_some() {
            return Ok(());
        }
        self.request(PlayerCommand::Seek(song, t))
    }

    /// Stop playback and release the output device.
    pub fn close_audio(&self) -> Result<(), ControlError> {
        self.stop()?;
        self.request(PlayerCommand::CloseAudio)
    }

    /// Keep the player from moving on to the queued song.
    pub fn lock_queue(&self) -> Result<(), ControlError> {
        if self.queue_lock() == QueueLockState::Locked {
            return Ok(());
        }
        self.request(PlayerCommand::LockQueue)
    }

    pub fn unlock_queue(&self) -> Result<(), ControlError> {
        if self.queue_lock() == QueueLockState::Unlocked {
            return Ok(());
        }
        self.request(PlayerCommand::UnlockQueue)
    }

    /// Ask the player thread to shut down.
    pub fn exit(&self) -> Result<(), ControlError> {
        self.request(PlayerCommand::Exit)
    }

    /// Offer `song` as the next one. Only accepted from the BLANK state.
    pub fn queue_song(&self, song: Arc<Song>) -> Result<(), ControlError> {
        {
            let mut sh = lock(&self.shared);
            if sh.queue_state != QueueState::Blank {
                return Err(ControlError::QueueBusy);
            }
            tracing::debug!(uri = %song.uri, "song queued");
            sh.next_song = Some(song);
            sh.queue_state = QueueState::Full;
        }
        self.notify.signal();
        Ok(())
    }

    pub fn queue_state(&self) -> QueueState {
        lock(&self.shared).queue_state
    }

    /// Client side of the queue handshake (`Decode -> Play | Stop`,
    /// `Empty -> Blank`).
    pub fn set_queue_state(&self, state: QueueState) {
        {
            let mut sh = lock(&self.shared);
            sh.queue_state = state;
            if state == QueueState::Blank {
                sh.next_song = None;
            }
        }
        self.notify.signal();
    }

    pub fn queue_lock(&self) -> QueueLockState {
        lock(&self.shared).queue_lock
    }

    /// Set the cross-fade duration; negative values disable it.
    pub fn set_cross_fade(&self, seconds: f32) {
        self.cross_fade
            .store(sanitize_cross_fade(seconds).to_bits(), Ordering::Relaxed);
    }

    pub fn cross_fade(&self) -> f32 {
        f32::from_bits(self.cross_fade.load(Ordering::Relaxed))
    }

    pub fn set_software_volume(&self, volume: i32) {
        let v = volume.clamp(0, VOLUME_MAX as i32) as u16;
        self.software_volume.store(v, Ordering::Relaxed);
    }

    pub fn software_volume(&self) -> u16 {
        self.software_volume.load(Ordering::Relaxed)
    }

    /// Chunks decoded before playback of a song starts.
    pub fn buffered_before_play(&self) -> usize {
        self.buffered_before_play
    }

    pub fn state(&self) -> PlayerState {
        lock(&self.shared).state
    }

    pub fn current_song(&self) -> Option<Arc<Song>> {
        lock(&self.shared).song.clone()
    }

    pub fn elapsed_time(&self) -> f32 {
        lock(&self.shared).elapsed
    }

    pub fn total_time(&self) -> Option<f32> {
        lock(&self.shared).total
    }

    pub fn bit_rate(&self) -> u16 {
        lock(&self.shared).bit_rate
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        lock(&self.shared).audio_format
    }

    pub fn error(&self) -> Option<PlayerError> {
        lock(&self.shared).error
    }

    pub fn errored_song(&self) -> Option<Arc<Song>> {
        lock(&self.shared).errored_song.clone()
    }

    pub fn clear_error(&self) {
        let mut sh = lock(&self.shared);
        sh.error = None;
        sh.errored_song = None;
    }

    pub fn error_message(&self) -> Option<String> {
        let sh = lock(&self.shared);
        let uri = sh.errored_song.as_ref().map(|s| s.uri.as_str());
        sh.error.map(|e| e.message(uri))
    }

    /// Seconds of audio played since startup.
    pub fn total_play_time(&self) -> f64 {
        let sh = lock(&self.shared);
        if sh.state == PlayerState::Stop {
            sh.total_play_time
        } else {
            sh.total_play_time + (sh.elapsed - sh.begin_time).max(0.0) as f64
        }
    }

    /// Events emitted by the player thread. Receivers share one queue.
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events_rx.clone()
    }

    pub fn status(&self) -> PlayerStatus {
        let sh = lock(&self.shared);
        let errored = sh.errored_song.as_ref().map(|s| s.uri.as_str());
        PlayerStatus {
            state: sh.state,
            song: sh.song.as_ref().map(|s| s.uri.clone()),
            elapsed: sh.elapsed,
            total: sh.total,
            bit_rate: sh.bit_rate,
            audio_format: sh.audio_format.map(|f| f.to_string()),
            volume: self.software_volume(),
            cross_fade: self.cross_fade(),
            queue_state: sh.queue_state,
            buffered_chunks: self.buffer.available(),
            buffer_capacity: self.buffer.capacity(),
            error: sh.error,
            error_message: sh.error.map(|e| e.message(errored)),
        }
    }

    // ---- player thread side ----

    pub(crate) fn emit(&self, event: PlayerEvent) {
        // `events_rx` lives in `self`, so this cannot fail.
        let _ = self.events_tx.send(event);
    }

    pub(crate) fn set_state(&self, state: PlayerState) {
        let changed = {
            let mut sh = lock(&self.shared);
            let changed = sh.state != state;
            if changed && state == PlayerState::Stop {
                sh.total_play_time += (sh.elapsed - sh.begin_time).max(0.0) as f64;
            }
            sh.state = state;
            changed
        };
        if changed {
            tracing::debug!(?state, "player state");
            self.emit(PlayerEvent::State(state));
        }
    }

    /// Player side of the queue handshake (`Full -> Decode`, `Play -> Empty`).
    pub(crate) fn advance_queue(&self, state: QueueState) {
        lock(&self.shared).queue_state = state;
        self.emit(PlayerEvent::Queue(state));
    }

    pub(crate) fn set_queue_lock(&self, state: QueueLockState) {
        lock(&self.shared).queue_lock = state;
    }

    pub(crate) fn next_song(&self) -> Option<Arc<Song>> {
        lock(&self.shared).next_song.clone()
    }

    pub(crate) fn set_error(&self, error: PlayerError, song: Option<Arc<Song>>) {
        {
            let mut sh = lock(&self.shared);
            sh.error = Some(error);
            sh.errored_song = song;
        }
        tracing::warn!(error = %error, "player error");
        self.emit(PlayerEvent::Error(error));
    }

    /// Record that `song` is now the one being heard.
    pub(crate) fn set_song(&self, song: Arc<Song>, total: Option<f32>, format: AudioFormat) {
        {
            let mut sh = lock(&self.shared);
            sh.total_play_time += (sh.elapsed - sh.begin_time).max(0.0) as f64;
            sh.song = Some(song.clone());
            sh.elapsed = 0.0;
            sh.begin_time = 0.0;
            sh.bit_rate = 0;
            sh.total = total;
            sh.audio_format = Some(format);
        }
        self.emit(PlayerEvent::SongStarted(song));
    }

    pub(crate) fn clear_song(&self) {
        let mut sh = lock(&self.shared);
        sh.song = None;
        sh.bit_rate = 0;
    }

    pub(crate) fn set_progress(&self, elapsed: f32, bit_rate: u16) {
        let mut sh = lock(&self.shared);
        sh.elapsed = elapsed;
        sh.bit_rate = bit_rate;
    }

    /// Jump the elapsed clock after a seek without counting the skipped span.
    pub(crate) fn seeked(&self, elapsed: f32) {
        let mut sh = lock(&self.shared);
        sh.total_play_time += (sh.elapsed - sh.begin_time).max(0.0) as f64;
        sh.elapsed = elapsed;
        sh.begin_time = elapsed;
        sh.bit_rate = 0;
    }
}

fn sanitize_cross_fade(seconds: f32) -> f32 {
    if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn control() -> (Arc<PlayerControl>, PlayerCommands) {
        let buffer = Arc::new(OutputBuffer::new(8, 64));
        let (pc, rx) = PlayerControl::new(buffer, 2, 0.0, VOLUME_MAX);
        (Arc::new(pc), rx)
    }

    #[test]
    fn queue_song_only_from_blank() {
        let (pc, _rx) = control();
        let song = Arc::new(Song::new("a.flac"));
        pc.queue_song(song.clone()).unwrap();
        assert_eq!(pc.queue_state(), QueueState::Full);
        assert_eq!(pc.queue_song(song), Err(ControlError::QueueBusy));
        pc.set_queue_state(QueueState::Blank);
        assert!(pc.next_song().is_none());
    }

    #[test]
    fn volume_and_cross_fade_are_clamped() {
        let (pc, _rx) = control();
        pc.set_software_volume(5000);
        assert_eq!(pc.software_volume(), 1000);
        pc.set_software_volume(-3);
        assert_eq!(pc.software_volume(), 0);
        pc.set_cross_fade(-2.0);
        assert_eq!(pc.cross_fade(), 0.0);
        pc.set_cross_fade(f32::NAN);
        assert_eq!(pc.cross_fade(), 0.0);
        pc.set_cross_fade(3.5);
        assert_eq!(pc.cross_fade(), 3.5);
    }

    #[test]
    fn requests_wait_for_reply() {
        let (pc, rx) = control();
        let worker = thread::spawn(move || {
            let req = rx.recv().unwrap();
            assert!(matches!(req.cmd, PlayerCommand::Stop));
            req.finish(Ok(()));
        });
        pc.stop().unwrap();
        worker.join().unwrap();
        assert_eq!(pc.queue_state(), QueueState::Blank);
    }

    #[test]
    fn dropped_player_disconnects_requests() {
        let (pc, rx) = control();
        drop(rx);
        assert_eq!(pc.exit(), Err(ControlError::Disconnected));
    }

    #[test]
    fn seek_requires_playback() {
        let (pc, _rx) = control();
        let song = Arc::new(Song::new("a.flac"));
        assert_eq!(pc.seek(song, 1.0), Err(ControlError::NotPlaying));
    }

    #[test]
    fn state_changes_are_broadcast_once() {
        let (pc, _rx) = control();
        let events = pc.events();
        pc.set_state(PlayerState::Play);
        pc.set_state(PlayerState::Play);
        pc.advance_queue(QueueState::Decode);
        assert!(matches!(
            events.try_recv(),
            Ok(PlayerEvent::State(PlayerState::Play))
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(PlayerEvent::Queue(QueueState::Decode))
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn error_message_names_errored_song() {
        let (pc, _rx) = control();
        pc.set_error(PlayerError::File, Some(Arc::new(Song::new("bad.flac"))));
        assert_eq!(
            pc.error_message().as_deref(),
            Some("problems decoding \"bad.flac\"")
        );
        let status = pc.status();
        assert_eq!(status.error, Some(PlayerError::File));
        assert_eq!(status.buffer_capacity, 8);
        pc.clear_error();
        assert!(pc.error().is_none());
        assert!(pc.error_message().is_none());
    }
}
