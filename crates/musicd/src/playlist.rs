//! Ordered song list driving the player's queue handshake.

use std::sync::Arc;

use musicd_player::{ControlError, PlayerControl, PlayerEvent, Song};
use musicd_types::QueueState;

pub struct Playlist {
    songs: Vec<Arc<Song>>,
    current: Option<usize>,
    queued: Option<usize>,
    repeat: bool,
    skip_errors: bool,
    /// A play request went out and its SongStarted (or Error) is pending.
    awaiting_start: bool,
    errors_in_row: usize,
}

impl Playlist {
    pub fn new(songs: Vec<Arc<Song>>, repeat: bool, skip_errors: bool) -> Self {
        Self {
            songs,
            current: None,
            queued: None,
            repeat,
            skip_errors,
            awaiting_start: false,
            errors_in_row: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn current(&self) -> Option<&Arc<Song>> {
        self.current.map(|i| &self.songs[i])
    }

    pub fn queued(&self) -> Option<&Arc<Song>> {
        self.queued.map(|i| &self.songs[i])
    }

    fn next_index(&self, from: usize) -> Option<usize> {
        if from + 1 < self.songs.len() {
            Some(from + 1)
        } else if self.repeat && !self.songs.is_empty() {
            Some(0)
        } else {
            None
        }
    }

    /// Start playback at `index` and queue the song after it.
    pub fn play(&mut self, pc: &PlayerControl, index: usize) -> Result<(), ControlError> {
        let Some(song) = self.songs.get(index).cloned() else {
            return Err(ControlError::NotPlaying);
        };
        tracing::info!(uri = %song.uri, index, "play");
        self.current = Some(index);
        self.queued = None;
        self.awaiting_start = true;
        pc.play(song)?;
        self.sync_with_queue(pc)
    }

    /// Advance the queue handshake one step from the client side.
    pub fn sync_with_queue(&mut self, pc: &PlayerControl) -> Result<(), ControlError> {
        match pc.queue_state() {
            QueueState::Blank => self.queue_next(pc),
            QueueState::Decode => {
                let decision = if self.queued.is_some() {
                    QueueState::Play
                } else {
                    QueueState::Stop
                };
                pc.set_queue_state(decision);
                Ok(())
            }
            QueueState::Empty => {
                if let Some(queued) = self.queued.take() {
                    self.current = Some(queued);
                }
                pc.set_queue_state(QueueState::Blank);
                self.queue_next(pc)
            }
            QueueState::Full | QueueState::Play | QueueState::Stop => Ok(()),
        }
    }

    fn queue_next(&mut self, pc: &PlayerControl) -> Result<(), ControlError> {
        if self.queued.is_some() {
            return Ok(());
        }
        let Some(next) = self.current.and_then(|c| self.next_index(c)) else {
            return Ok(());
        };
        pc.queue_song(self.songs[next].clone())?;
        tracing::debug!(uri = %self.songs[next].uri, "queued");
        self.queued = Some(next);
        Ok(())
    }

    /// React to a player event. Returns `false` once playback is over.
    pub fn handle_event(
        &mut self,
        pc: &PlayerControl,
        event: &PlayerEvent,
    ) -> Result<bool, ControlError> {
        match event {
            PlayerEvent::SongStarted(_) => {
                self.awaiting_start = false;
                self.errors_in_row = 0;
            }
            PlayerEvent::Queue(_) => self.sync_with_queue(pc)?,
            PlayerEvent::Error(error) => {
                self.errors_in_row += 1;
                let failed = pc.errored_song();
                tracing::warn!(
                    error = %error,
                    uri = failed.as_ref().map(|s| s.uri.as_str()).unwrap_or(""),
                    "song failed"
                );
                if !self.skip_errors || self.errors_in_row >= self.songs.len() {
                    return Ok(false);
                }
                let from = self.index_of(failed.as_ref()).or(self.current);
                return match from.and_then(|i| self.next_index(i)) {
                    Some(next) => {
                        self.play(pc, next)?;
                        Ok(true)
                    }
                    None => Ok(false),
                };
            }
            PlayerEvent::State(musicd_types::PlayerState::Stop) if !self.awaiting_start => {
                return Ok(false);
            }
            PlayerEvent::State(_) | PlayerEvent::SongFinished(_) => {}
        }
        Ok(true)
    }

    fn index_of(&self, song: Option<&Arc<Song>>) -> Option<usize> {
        let song = song?;
        [self.queued, self.current]
            .into_iter()
            .flatten()
            .find(|&i| Arc::ptr_eq(&self.songs[i], song))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use musicd_player::OutputBuffer;
    use musicd_player::player_control::{PlayerCommand, PlayerCommands};
    use std::thread::{self, JoinHandle};

    fn songs(n: usize) -> Vec<Arc<Song>> {
        (0..n)
            .map(|i| Arc::new(Song::new(format!("song{i}.flac"))))
            .collect()
    }

    /// A stand-in player thread acknowledging every request.
    fn control() -> (Arc<PlayerControl>, JoinHandle<Vec<PlayerCommand>>) {
        let buffer = Arc::new(OutputBuffer::new(8, 64));
        let (pc, rx): (PlayerControl, PlayerCommands) = PlayerControl::new(buffer, 1, 0.0, 1000);
        let worker = thread::spawn(move || {
            let mut seen = Vec::new();
            while let Ok(req) = rx.recv() {
                let exit = matches!(req.cmd, PlayerCommand::Exit);
                seen.push(req.cmd.clone());
                req.finish(Ok(()));
                if exit {
                    break;
                }
            }
            seen
        });
        (Arc::new(pc), worker)
    }

    #[test]
    fn play_queues_the_following_song() {
        let (pc, worker) = control();
        let mut playlist = Playlist::new(songs(3), false, false);
        playlist.play(&pc, 0).unwrap();
        assert_eq!(pc.queue_state(), QueueState::Full);
        assert_eq!(playlist.queued().unwrap().uri, "song1.flac");
        pc.exit().unwrap();
        let seen = worker.join().unwrap();
        assert!(matches!(seen[0], PlayerCommand::Stop));
        assert!(matches!(seen[1], PlayerCommand::Play(ref s) if s.uri == "song0.flac"));
    }

    #[test]
    fn handshake_walks_through_the_list() {
        let (pc, worker) = control();
        let mut playlist = Playlist::new(songs(2), false, false);
        playlist.play(&pc, 0).unwrap();

        // The player started decoding song1.
        pc.set_queue_state(QueueState::Decode);
        playlist.sync_with_queue(&pc).unwrap();
        assert_eq!(pc.queue_state(), QueueState::Play);

        // The player crossed into song1.
        pc.set_queue_state(QueueState::Empty);
        playlist.sync_with_queue(&pc).unwrap();
        assert_eq!(playlist.current().unwrap().uri, "song1.flac");
        assert_eq!(pc.queue_state(), QueueState::Blank);
        assert!(playlist.queued().is_none());
        pc.exit().unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn repeat_wraps_to_the_first_song() {
        let (pc, worker) = control();
        let mut playlist = Playlist::new(songs(2), true, false);
        playlist.play(&pc, 1).unwrap();
        assert_eq!(playlist.queued().unwrap().uri, "song0.flac");
        pc.exit().unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn stop_after_start_ends_playback() {
        let (pc, worker) = control();
        let mut playlist = Playlist::new(songs(1), false, false);
        playlist.play(&pc, 0).unwrap();
        let stop = PlayerEvent::State(musicd_types::PlayerState::Stop);
        // Still waiting for the song to start: a stale stop is ignored.
        assert!(playlist.handle_event(&pc, &stop).unwrap());
        let started = PlayerEvent::SongStarted(playlist.current().unwrap().clone());
        assert!(playlist.handle_event(&pc, &started).unwrap());
        assert!(!playlist.handle_event(&pc, &stop).unwrap());
        pc.exit().unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn errors_end_playback_unless_skipping() {
        let (pc, worker) = control();
        let mut playlist = Playlist::new(songs(3), false, false);
        playlist.play(&pc, 0).unwrap();
        let err = PlayerEvent::Error(musicd_types::PlayerError::File);
        assert!(!playlist.handle_event(&pc, &err).unwrap());

        let mut playlist = Playlist::new(songs(3), false, true);
        playlist.play(&pc, 0).unwrap();
        assert!(playlist.handle_event(&pc, &err).unwrap());
        assert_eq!(playlist.current().unwrap().uri, "song1.flac");
        assert!(playlist.handle_event(&pc, &err).unwrap());
        assert_eq!(playlist.current().unwrap().uri, "song2.flac");
        // Every song failed once.
        assert!(!playlist.handle_event(&pc, &err).unwrap());
        pc.exit().unwrap();
        worker.join().unwrap();
    }
}
