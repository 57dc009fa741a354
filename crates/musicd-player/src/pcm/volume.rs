use crate::audio_format::AudioFormat;
use crate::pcm::sample;

/// Unity gain on the software volume scale.
pub const VOLUME_MAX: u16 = 1000;

/// Scale `buf` by `volume / 1000`, saturating. `1000` leaves the data untouched.
pub fn pcm_volume(buf: &mut [u8], format: &AudioFormat, volume: u16) {
    if volume >= VOLUME_MAX {
        return;
    }
    if volume == 0 {
        buf.fill(0);
        return;
    }
    let volume = volume as i64;
    let half = VOLUME_MAX as i64 / 2;
    sample::map_in_place(buf, format, |v| {
        let scaled = v * volume;
        if scaled >= 0 {
            (scaled + half) / VOLUME_MAX as i64
        } else {
            (scaled - half) / VOLUME_MAX as i64
        }
    });
}

/// Multiply `buf` by a linear `factor`, saturating.
pub fn pcm_scale(buf: &mut [u8], format: &AudioFormat, factor: f32) {
    if (factor - 1.0).abs() < f32::EPSILON {
        return;
    }
    let factor = factor.max(0.0) as f64;
    sample::map_in_place(buf, format, |v| (v as f64 * factor).round() as i64);
}
