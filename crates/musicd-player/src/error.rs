/// Failure of a control request sent to the decoder or player thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// The worker thread has exited.
    #[error("pipeline thread is gone")]
    Disconnected,
    /// The request needs a playing song.
    #[error("not playing")]
    NotPlaying,
    /// The current song cannot seek.
    #[error("song is not seekable")]
    NotSeekable,
    /// The decoder accepted the seek but could not perform it.
    #[error("seek failed")]
    SeekFailed,
    /// A song is already queued.
    #[error("queue slot is busy")]
    QueueBusy,
}
