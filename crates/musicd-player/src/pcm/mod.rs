//! PCM processing applied between decoder and device.

pub mod convert;
pub mod mix;
pub mod normalize;
pub mod replay_gain;
pub mod sample;
pub mod volume;

pub use convert::PcmConverter;
pub use mix::pcm_mix;
pub use normalize::{Normalizer, NormalizerConfig};
pub use replay_gain::{ReplayGainConfig, ReplayGainInfo, ReplayGainMode};
pub use volume::{VOLUME_MAX, pcm_scale, pcm_volume};
