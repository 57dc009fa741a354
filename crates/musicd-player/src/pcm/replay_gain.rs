//! ReplayGain metadata and the linear scale derived from it.

use std::str::FromStr;

/// Which ReplayGain values to apply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplayGainMode {
    #[default]
    Off,
    Track,
    Album,
}

impl FromStr for ReplayGainMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "" => Ok(ReplayGainMode::Off),
            "track" => Ok(ReplayGainMode::Track),
            "album" => Ok(ReplayGainMode::Album),
            other => Err(anyhow::anyhow!("unknown replay gain mode: {other}")),
        }
    }
}

/// Gain values carried by a song's tags. Gains are in dB, peaks linear.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReplayGainInfo {
    pub track_gain: Option<f32>,
    pub track_peak: Option<f32>,
    pub album_gain: Option<f32>,
    pub album_peak: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReplayGainConfig {
    pub mode: ReplayGainMode,
    /// Added to the tag gain, in dB.
    pub preamp: f32,
    /// Applied to songs without ReplayGain tags, in dB.
    pub missing_preamp: f32,
    /// Never scale a song's peak above full scale.
    pub limit: bool,
}

impl Default for ReplayGainConfig {
    fn default() -> Self {
        Self {
            mode: ReplayGainMode::Off,
            preamp: 0.0,
            missing_preamp: 0.0,
            limit: true,
        }
    }
}

impl ReplayGainInfo {
    pub fn is_empty(&self) -> bool {
        self.track_gain.is_none() && self.album_gain.is_none()
    }

    /// Gain and peak for `mode`; album mode falls back to track values.
    fn select(&self, mode: ReplayGainMode) -> Option<(f32, Option<f32>)> {
        match mode {
            ReplayGainMode::Off => None,
            ReplayGainMode::Track => self
                .track_gain
                .map(|g| (g, self.track_peak))
                .or_else(|| self.album_gain.map(|g| (g, self.album_peak))),
            ReplayGainMode::Album => self
                .album_gain
                .map(|g| (g, self.album_peak))
                .or_else(|| self.track_gain.map(|g| (g, self.track_peak))),
        }
    }
}

/// Linear scale factor for a song carrying `info` (or none).
pub fn replay_gain_scale(info: Option<&ReplayGainInfo>, config: &ReplayGainConfig) -> f32 {
    if config.mode == ReplayGainMode::Off {
        return 1.0;
    }
    match info.and_then(|i| i.select(config.mode)) {
        Some((gain, peak)) => {
            let mut scale = db_to_linear(gain + config.preamp);
            if config.limit {
                if let Some(peak) = peak.filter(|p| *p > 0.0) {
                    scale = scale.min(1.0 / peak);
                }
            }
            scale
        }
        None => db_to_linear(config.missing_preamp),
    }
}

pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Parse a tag value like `"-6.48 dB"` or `"0.988"`.
pub fn parse_tag_value(raw: &str) -> Option<f32> {
    let trimmed = raw.trim();
    let number = trimmed
        .strip_suffix("dB")
        .or_else(|| trimmed.strip_suffix("db"))
        .or_else(|| trimmed.strip_suffix("DB"))
        .unwrap_or(trimmed)
        .trim();
    number.parse::<f32>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ReplayGainInfo {
        ReplayGainInfo {
            track_gain: Some(-6.0),
            track_peak: Some(0.5),
            album_gain: Some(6.0),
            album_peak: Some(0.9),
        }
    }

    #[test]
    fn off_mode_is_unity() {
        let cfg = ReplayGainConfig::default();
        assert_eq!(replay_gain_scale(Some(&info()), &cfg), 1.0);
    }

    #[test]
    fn track_gain_scale() {
        let cfg = ReplayGainConfig {
            mode: ReplayGainMode::Track,
            ..ReplayGainConfig::default()
        };
        let scale = replay_gain_scale(Some(&info()), &cfg);
        assert!((scale - 0.501).abs() < 0.001);
    }

    #[test]
    fn album_gain_limited_by_peak() {
        let cfg = ReplayGainConfig {
            mode: ReplayGainMode::Album,
            ..ReplayGainConfig::default()
        };
        let scale = replay_gain_scale(Some(&info()), &cfg);
        assert!((scale - 1.0 / 0.9).abs() < 1e-5);
    }

    #[test]
    fn album_falls_back_to_track() {
        let cfg = ReplayGainConfig {
            mode: ReplayGainMode::Album,
            limit: false,
            ..ReplayGainConfig::default()
        };
        let only_track = ReplayGainInfo {
            track_gain: Some(0.0),
            ..ReplayGainInfo::default()
        };
        assert_eq!(replay_gain_scale(Some(&only_track), &cfg), 1.0);
    }

    #[test]
    fn missing_tags_use_missing_preamp() {
        let cfg = ReplayGainConfig {
            mode: ReplayGainMode::Track,
            missing_preamp: -20.0,
            ..ReplayGainConfig::default()
        };
        assert!((replay_gain_scale(None, &cfg) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn parse_tag_value_accepts_db_suffix() {
        assert_eq!(parse_tag_value("-6.48 dB"), Some(-6.48));
        assert_eq!(parse_tag_value(" 0.988 "), Some(0.988));
        assert_eq!(parse_tag_value("loud"), None);
    }

    #[test]
    fn mode_from_str() {
        assert_eq!("Album".parse::<ReplayGainMode>().unwrap(), ReplayGainMode::Album);
        assert!("loudest".parse::<ReplayGainMode>().is_err());
    }
}
