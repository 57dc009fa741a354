//! Cross-fade sizing and mixing.

use crate::audio_format::AudioFormat;
use crate::pcm::pcm_mix;

/// Number of chunks a cross-fade of `duration` seconds spans.
///
/// `round(duration * bytes_per_second / chunk_size)`, clamped to
/// `max_chunks`. Returns 0 (cross-fade disabled) when `duration <= 0`, when
/// `duration` reaches the song's `total_time`, or when the next song's format
/// differs from the current one.
pub fn cross_fade_calc(
    duration: f32,
    total_time: Option<f32>,
    format: &AudioFormat,
    old_format: &AudioFormat,
    max_chunks: usize,
    chunk_size: usize,
) -> usize {
    if !(duration > 0.0) || chunk_size == 0 {
        return 0;
    }
    if total_time.is_some_and(|t| duration >= t) {
        return 0;
    }
    if format != old_format {
        return 0;
    }
    let chunks = (duration as f64 * format.bytes_per_second() / chunk_size as f64).round();
    (chunks as usize).min(max_chunks)
}

/// Mix chunk `b` of the newer song into chunk `a` of the older one.
///
/// The newer chunk gets weight `k / n`: `k == 0` keeps `a` unchanged and
/// `k == n` replaces it with `b`. Returns the new length of `a`, which grows
/// to `b`'s length when `b` is longer.
pub fn cross_fade_apply(
    a: &mut [u8],
    a_len: usize,
    b: &[u8],
    format: &AudioFormat,
    k: u32,
    n: u32,
) -> usize {
    let w = if n == 0 {
        1.0
    } else {
        (k.min(n) as f32) / n as f32
    };
    pcm_mix(a, a_len, b, format, w)
}
