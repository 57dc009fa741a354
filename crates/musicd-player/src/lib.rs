pub mod audio_format;
pub mod config;
pub mod crossfade;
pub mod decoder;
pub mod decoder_control;
pub mod device;
pub mod error;
pub mod notify;
pub mod output;
pub mod output_buffer;
pub mod pcm;
pub mod pipeline;
pub mod player;
pub mod player_control;
pub mod queue;
pub mod resample;
pub mod song;

pub use audio_format::AudioFormat;
pub use config::PlaybackConfig;
pub use decoder::{DecoderApi, DecoderPlugin, DecoderRegistry};
pub use decoder_control::{DecodeError, DecoderControl, DecoderState};
pub use error::ControlError;
pub use output::{AudioOutput, OutputConfig, OutputPlugin};
pub use output_buffer::OutputBuffer;
pub use pipeline::{Pipeline, PipelineConfig};
pub use player_control::{PlayerControl, PlayerEvent};
pub use song::{Song, Tag};
