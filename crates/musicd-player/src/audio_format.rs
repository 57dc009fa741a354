//! PCM audio format negotiated between decoder, output buffer and output.

use std::fmt;
use std::str::FromStr;

/// Interleaved, native-endian, signed integer PCM.
///
/// 24-bit samples are stored low-aligned in 4 bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits: u8,
    pub channels: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("malformed audio format {0:?}, expected rate:bits:channels")]
    Malformed(String),
    #[error("invalid sample rate {0}")]
    SampleRate(u32),
    #[error("unsupported sample size {0}")]
    Bits(u8),
    #[error("invalid channel count {0}")]
    Channels(u8),
}

impl AudioFormat {
    /// 44.1 kHz, 16-bit, stereo.
    pub const CD: AudioFormat = AudioFormat {
        sample_rate: 44_100,
        bits: 16,
        channels: 2,
    };

    pub const MAX_CHANNELS: u8 = 8;

    pub fn new(sample_rate: u32, bits: u8, channels: u8) -> Self {
        Self {
            sample_rate,
            bits,
            channels,
        }
    }

    /// Bytes used to store one sample.
    pub fn sample_size(&self) -> usize {
        match self.bits {
            8 => 1,
            16 => 2,
            24 | 32 => 4,
            _ => 0,
        }
    }

    /// Bytes used to store one frame (one sample per channel).
    pub fn frame_size(&self) -> usize {
        self.sample_size() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.sample_rate as f64 * self.frame_size() as f64
    }

    /// Seconds of audio held by `bytes` in this format.
    pub fn duration_of(&self, bytes: usize) -> f32 {
        let bps = self.bytes_per_second();
        if bps <= 0.0 {
            return 0.0;
        }
        (bytes as f64 / bps) as f32
    }

    pub fn validate(&self) -> Result<(), FormatError> {
        if self.sample_rate == 0 || self.sample_rate > 768_000 {
            return Err(FormatError::SampleRate(self.sample_rate));
        }
        if !matches!(self.bits, 8 | 16 | 24 | 32) {
            return Err(FormatError::Bits(self.bits));
        }
        if self.channels == 0 || self.channels > Self::MAX_CHANNELS {
            return Err(FormatError::Channels(self.channels));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.sample_rate, self.bits, self.channels)
    }
}

impl FromStr for AudioFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || FormatError::Malformed(s.to_string());
        let mut parts = s.trim().split(':');
        let (Some(rate), Some(bits), Some(channels), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        let format = AudioFormat {
            sample_rate: rate.trim().parse().map_err(|_| malformed())?,
            bits: bits.trim().parse().map_err(|_| malformed())?,
            channels: channels.trim().parse().map_err(|_| malformed())?,
        };
        format.validate()?;
        Ok(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_follow_bit_depth() {
        assert_eq!(AudioFormat::new(8_000, 8, 1).frame_size(), 1);
        assert_eq!(AudioFormat::CD.frame_size(), 4);
        assert_eq!(AudioFormat::new(48_000, 24, 2).frame_size(), 8);
        assert_eq!(AudioFormat::new(48_000, 32, 6).frame_size(), 24);
    }

    #[test]
    fn bytes_per_second_for_cd() {
        assert_eq!(AudioFormat::CD.bytes_per_second(), 176_400.0);
        assert!((AudioFormat::CD.duration_of(176_400) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn parse_and_display_roundtrip() {
        let f: AudioFormat = "48000:24:2".parse().unwrap();
        assert_eq!(f, AudioFormat::new(48_000, 24, 2));
        assert_eq!(f.to_string(), "48000:24:2");
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(
            "44100:16".parse::<AudioFormat>(),
            Err(FormatError::Malformed(_))
        ));
        assert!(matches!(
            "44100:12:2".parse::<AudioFormat>(),
            Err(FormatError::Bits(12))
        ));
        assert!(matches!(
            "44100:16:0".parse::<AudioFormat>(),
            Err(FormatError::Channels(0))
        ));
        assert!(matches!(
            "0:16:2".parse::<AudioFormat>(),
            Err(FormatError::SampleRate(0))
        ));
    }
}
