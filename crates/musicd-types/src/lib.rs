use serde::{Deserialize, Serialize};

/// Playback state reported by the player thread.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    /// Nothing is playing; the output device is closed or idle.
    #[default]
    Stop,
    /// A song is loaded but output is suspended.
    Pause,
    /// Audio is flowing to the output.
    Play,
}

/// Handshake state for the song queued after the current one.
///
/// The player thread and the playlist layer walk this together:
/// `Blank -> Full` (client queued a song), `Full -> Decode` (player started
/// decoding it), `Decode -> Play | Stop` (client decision at the border),
/// `Play -> Empty` (player crossed into the next song), `Empty -> Blank`
/// (client advanced its current position).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    #[default]
    Blank,
    Full,
    Decode,
    Play,
    Stop,
    Empty,
}

/// Lock preventing the player from consuming the queued song.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueLockState {
    #[default]
    Unlocked,
    Locked,
}

/// Terminal playback failure recorded on the player control.
///
/// Absence of an error (`Option::None`) is the "no error" state.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum PlayerError {
    /// The decoder failed on a song it had accepted.
    #[error("problems decoding file")]
    File,
    /// The output device could not be opened or written.
    #[error("problems opening audio device")]
    Audio,
    /// Internal failure (thread spawn, channel loss).
    #[error("system error occurred")]
    System,
    /// No decoder plugin handles the song.
    #[error("file type is unknown")]
    UnknownType,
    /// The song's file does not exist.
    #[error("file does not exist or is inaccessible")]
    FileNotFound,
}

impl PlayerError {
    /// Client-facing message naming the song that caused the error, if any.
    pub fn message(&self, uri: Option<&str>) -> String {
        let uri = uri.unwrap_or("");
        match self {
            PlayerError::FileNotFound => {
                format!("file \"{uri}\" does not exist or is inaccessible")
            }
            PlayerError::File => format!("problems decoding \"{uri}\""),
            PlayerError::Audio => "problems opening audio device".to_string(),
            PlayerError::System => "system error occurred".to_string(),
            PlayerError::UnknownType => format!("file type of \"{uri}\" is unknown"),
        }
    }
}

/// Point-in-time status of the playback pipeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    /// Player state.
    pub state: PlayerState,
    /// URI of the song currently heard, if any.
    pub song: Option<String>,
    /// Elapsed playback time in seconds.
    pub elapsed: f32,
    /// Total song time in seconds, if known.
    pub total: Option<f32>,
    /// Bit rate of the chunk last played (kbit/s).
    pub bit_rate: u16,
    /// Audio format of the output, `rate:bits:channels`.
    pub audio_format: Option<String>,
    /// Software volume, 0..=1000.
    pub volume: u16,
    /// Configured cross-fade duration in seconds.
    pub cross_fade: f32,
    /// State of the queued-song handshake.
    pub queue_state: QueueState,
    /// Chunks waiting in the output buffer.
    pub buffered_chunks: usize,
    /// Output buffer capacity in chunks.
    pub buffer_capacity: usize,
    /// Last error, if any.
    pub error: Option<PlayerError>,
    /// Human-readable message for `error`.
    pub error_message: Option<String>,
}
