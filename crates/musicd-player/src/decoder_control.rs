//! Shared control block between the player thread and the decoder thread.
//!
//! Commands travel as tagged [`DecoderCommand`] messages over a channel. The
//! decoder thread keeps the command it is working on in a pending slot so
//! plugins and [`OutputBuffer::send`](crate::output_buffer::OutputBuffer::send)
//! can peek at it without consuming it; [`DecoderControl::command_finished`]
//! clears the slot and acknowledges the sender. STOP, SEEK and QUIT are
//! synchronous, START is fire-and-forget.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};

use crate::audio_format::AudioFormat;
use crate::error::ControlError;
use crate::notify::{Notify, lock};
use crate::pcm::ReplayGainInfo;
use crate::song::{Song, Tag};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DecoderState {
    #[default]
    Stop,
    Start,
    Decode,
}

/// Kind of the command currently pending for the decoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DecoderCommandKind {
    #[default]
    None,
    Start,
    Stop,
    Seek,
}

#[derive(Clone, Debug)]
pub enum DecoderCommand {
    Start(Arc<Song>),
    Stop,
    Seek(f64),
    Quit,
}

impl DecoderCommand {
    /// Kind as seen by plugins; QUIT interrupts decoding like STOP.
    pub fn kind(&self) -> DecoderCommandKind {
        match self {
            DecoderCommand::Start(_) => DecoderCommandKind::Start,
            DecoderCommand::Stop | DecoderCommand::Quit => DecoderCommandKind::Stop,
            DecoderCommand::Seek(_) => DecoderCommandKind::Seek,
        }
    }

    fn needs_ack(&self) -> bool {
        !matches!(self, DecoderCommand::Start(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("no decoder plugin for this file type")]
    UnknownType,
    #[error("file not found")]
    NotFound,
    #[error("decoding failed: {0}")]
    File(String),
}

#[derive(Debug, Default)]
struct DecoderStatus {
    state: DecoderState,
    error: Option<DecodeError>,
    song: Option<Arc<Song>>,
    in_format: Option<AudioFormat>,
    out_format: Option<AudioFormat>,
    seekable: bool,
    total_time: Option<f32>,
    seek_error: bool,
    replay_gain: Option<ReplayGainInfo>,
    tag: Option<Tag>,
}

#[derive(Debug)]
pub struct DecoderControl {
    cmd_tx: Sender<DecoderCommand>,
    cmd_rx: Receiver<DecoderCommand>,
    pending: Mutex<Option<DecoderCommand>>,
    ack_tx: Mutex<Option<Sender<()>>>,
    ack_rx: Receiver<()>,
    decoder_notify: Arc<Notify>,
    player_notify: Arc<Notify>,
    status: Mutex<DecoderStatus>,
}

impl DecoderControl {
    /// `decoder_notify` wakes the decoder when blocked on a full buffer,
    /// `player_notify` wakes the player on decoder state changes.
    pub fn new(decoder_notify: Arc<Notify>, player_notify: Arc<Notify>) -> Self {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        // One client thread waits for one ack at a time.
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        Self {
            cmd_tx,
            cmd_rx,
            pending: Mutex::new(None),
            ack_tx: Mutex::new(Some(ack_tx)),
            ack_rx,
            decoder_notify,
            player_notify,
            status: Mutex::new(DecoderStatus::default()),
        }
    }

    // ---- client side (player thread) ----

    /// Begin decoding `song`. The state reads START from this call on.
    pub fn start(&self, song: Arc<Song>) {
        {
            let mut st = lock(&self.status);
            st.state = DecoderState::Start;
            st.error = None;
            st.song = Some(song.clone());
            st.in_format = None;
            st.out_format = None;
            st.seekable = false;
            st.total_time = song.duration();
            st.replay_gain = None;
            st.tag = None;
        }
        tracing::debug!(uri = %song.uri, "decoder start");
        self.post(DecoderCommand::Start(song));
    }

    /// Abort decoding and wait until the decoder is idle.
    pub fn stop(&self) -> Result<(), ControlError> {
        self.post(DecoderCommand::Stop);
        self.wait_ack()
    }

    /// Seek the song being decoded to `t` seconds.
    pub fn seek(&self, t: f64) -> Result<(), ControlError> {
        {
            let st = lock(&self.status);
            if st.state == DecoderState::Stop {
                return Err(ControlError::NotPlaying);
            }
            if st.state == DecoderState::Decode && !st.seekable {
                return Err(ControlError::NotSeekable);
            }
        }
        self.post(DecoderCommand::Seek(t));
        self.wait_ack()?;
        if lock(&self.status).seek_error {
            Err(ControlError::SeekFailed)
        } else {
            Ok(())
        }
    }

    /// Ask the decoder thread to exit and wait for it.
    pub fn quit(&self) -> Result<(), ControlError> {
        self.post(DecoderCommand::Quit);
        self.wait_ack()
    }

    /// Queue a command without waiting for its acknowledgement.
    pub(crate) fn post(&self, cmd: DecoderCommand) {
        // The receiver lives in `self`, so sending cannot fail.
        let _ = self.cmd_tx.send(cmd);
        self.decoder_notify.signal();
    }

    fn wait_ack(&self) -> Result<(), ControlError> {
        self.ack_rx.recv().map_err(|_| ControlError::Disconnected)
    }

    pub fn state(&self) -> DecoderState {
        lock(&self.status).state
    }

    pub fn error(&self) -> Option<DecodeError> {
        lock(&self.status).error.clone()
    }

    pub fn current_song(&self) -> Option<Arc<Song>> {
        lock(&self.status).song.clone()
    }

    /// Whether `song` (the same shared instance) is the one being decoded.
    pub fn is_current_song(&self, song: &Arc<Song>) -> bool {
        lock(&self.status)
            .song
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, song))
    }

    pub fn in_format(&self) -> Option<AudioFormat> {
        lock(&self.status).in_format
    }

    /// Format the decoded chunks are stored in.
    pub fn out_format(&self) -> Option<AudioFormat> {
        lock(&self.status).out_format
    }

    pub fn seekable(&self) -> bool {
        lock(&self.status).seekable
    }

    pub fn total_time(&self) -> Option<f32> {
        lock(&self.status).total_time
    }

    pub fn replay_gain(&self) -> Option<ReplayGainInfo> {
        lock(&self.status).replay_gain
    }

    pub fn tag(&self) -> Option<Tag> {
        lock(&self.status).tag.clone()
    }

    // ---- decoder side ----

    /// Kind of the pending command, pulling the next message if none is.
    pub fn command(&self) -> DecoderCommandKind {
        let mut pending = lock(&self.pending);
        if pending.is_none() {
            *pending = self.cmd_rx.try_recv().ok();
        }
        pending.as_ref().map(DecoderCommand::kind).unwrap_or_default()
    }

    /// Target of the pending SEEK, in seconds.
    pub fn seek_where(&self) -> Option<f64> {
        match lock(&self.pending).as_ref() {
            Some(DecoderCommand::Seek(t)) => Some(*t),
            _ => None,
        }
    }

    /// Block until a command is pending and return it (still pending).
    pub(crate) fn wait_command(&self) -> Option<DecoderCommand> {
        if let Some(cmd) = lock(&self.pending).clone() {
            return Some(cmd);
        }
        let cmd = self.cmd_rx.recv().ok()?;
        *lock(&self.pending) = Some(cmd.clone());
        Some(cmd)
    }

    /// Clear the pending command and acknowledge it to the sender.
    pub fn command_finished(&self) {
        let done = lock(&self.pending).take();
        if let Some(cmd) = done {
            if cmd.needs_ack() {
                if let Some(tx) = lock(&self.ack_tx).as_ref() {
                    if tx.try_send(()).is_err() {
                        tracing::debug!("ack dropped, nobody waiting");
                    }
                }
            }
        }
    }

    pub(crate) fn set_state(&self, state: DecoderState) {
        lock(&self.status).state = state;
        self.player_notify.signal();
    }

    pub(crate) fn set_error(&self, error: DecodeError) {
        lock(&self.status).error = Some(error);
    }

    pub(crate) fn set_seek_error(&self, failed: bool) {
        lock(&self.status).seek_error = failed;
    }

    /// Record the negotiated formats and enter the DECODE state.
    pub(crate) fn set_decoding(
        &self,
        in_format: AudioFormat,
        out_format: AudioFormat,
        seekable: bool,
        total_time: Option<f32>,
    ) {
        {
            let mut st = lock(&self.status);
            st.in_format = Some(in_format);
            st.out_format = Some(out_format);
            st.seekable = seekable;
            if total_time.is_some() {
                st.total_time = total_time;
            }
            st.state = DecoderState::Decode;
        }
        self.player_notify.signal();
    }

    pub(crate) fn set_replay_gain(&self, info: Option<ReplayGainInfo>) {
        lock(&self.status).replay_gain = info;
    }

    pub(crate) fn set_tag(&self, tag: Tag) {
        lock(&self.status).tag = Some(tag);
    }

    /// Called when the decoder thread exits; unblocks any waiting sender.
    pub(crate) fn close(&self) {
        lock(&self.ack_tx).take();
        lock(&self.status).state = DecoderState::Stop;
        self.player_notify.signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn control() -> Arc<DecoderControl> {
        Arc::new(DecoderControl::new(
            Arc::new(Notify::new()),
            Arc::new(Notify::new()),
        ))
    }

    #[test]
    fn start_sets_state_before_decoder_sees_it() {
        let dc = control();
        dc.start(Arc::new(Song::new("a.flac")));
        assert_eq!(dc.state(), DecoderState::Start);
        assert_eq!(dc.command(), DecoderCommandKind::Start);
    }

    #[test]
    fn command_peek_does_not_consume() {
        let dc = control();
        dc.post(DecoderCommand::Seek(12.0));
        assert_eq!(dc.command(), DecoderCommandKind::Seek);
        assert_eq!(dc.command(), DecoderCommandKind::Seek);
        assert_eq!(dc.seek_where(), Some(12.0));
        dc.command_finished();
        assert_eq!(dc.command(), DecoderCommandKind::None);
    }

    #[test]
    fn unclaimed_acks_never_block_the_decoder() {
        let dc = control();
        for _ in 0..3 {
            dc.post(DecoderCommand::Stop);
            assert_eq!(dc.command(), DecoderCommandKind::Stop);
            dc.command_finished();
        }
        assert_eq!(dc.command(), DecoderCommandKind::None);
    }

    #[test]
    fn quit_reads_as_stop_to_plugins() {
        assert_eq!(DecoderCommand::Quit.kind(), DecoderCommandKind::Stop);
    }

    #[test]
    fn stop_waits_for_ack() {
        let dc = control();
        let worker = dc.clone();
        let handle = thread::spawn(move || {
            let cmd = worker.wait_command().unwrap();
            assert!(matches!(cmd, DecoderCommand::Stop));
            worker.command_finished();
        });
        dc.stop().unwrap();
        handle.join().unwrap();
        assert_eq!(dc.command(), DecoderCommandKind::None);
    }

    #[test]
    fn seek_when_idle_is_rejected() {
        let dc = control();
        assert_eq!(dc.seek(1.0), Err(ControlError::NotPlaying));
    }

    #[test]
    fn closed_control_reports_disconnect() {
        let dc = control();
        dc.close();
        assert_eq!(dc.stop(), Err(ControlError::Disconnected));
    }

    #[test]
    fn is_current_song_compares_identity() {
        let dc = control();
        let a = Arc::new(Song::new("a.flac"));
        let a_again = Arc::new(Song::new("a.flac"));
        dc.start(a.clone());
        assert!(dc.is_current_song(&a));
        assert!(!dc.is_current_song(&a_again));
    }
}
