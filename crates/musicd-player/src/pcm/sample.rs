//! Raw sample access for the buffer's byte layout.

use crate::audio_format::AudioFormat;

/// Largest positive sample value for a bit depth.
pub fn sample_max(bits: u8) -> i64 {
    match bits {
        8 => i8::MAX as i64,
        16 => i16::MAX as i64,
        24 => (1 << 23) - 1,
        _ => i32::MAX as i64,
    }
}

pub fn sample_min(bits: u8) -> i64 {
    -sample_max(bits) - 1
}

/// Read the sample starting at `bytes[0]`.
#[inline]
pub fn read(bytes: &[u8], bits: u8) -> i32 {
    match bits {
        8 => bytes[0] as i8 as i32,
        16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as i32,
        _ => i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

/// Write `value` (already in range for `bits`) at `out[0]`.
#[inline]
pub fn write(out: &mut [u8], bits: u8, value: i32) {
    match bits {
        8 => out[0] = value as i8 as u8,
        16 => out[..2].copy_from_slice(&(value as i16).to_ne_bytes()),
        _ => out[..4].copy_from_slice(&value.to_ne_bytes()),
    }
}

#[inline]
pub fn clamp(value: i64, bits: u8) -> i32 {
    value.clamp(sample_min(bits), sample_max(bits)) as i32
}

/// Apply `f` to every sample of `buf` in place, saturating the result.
pub fn map_in_place(buf: &mut [u8], format: &AudioFormat, mut f: impl FnMut(i64) -> i64) {
    let size = format.sample_size();
    if size == 0 {
        return;
    }
    for s in buf.chunks_exact_mut(size) {
        let v = read(s, format.bits) as i64;
        write(s, format.bits, clamp(f(v), format.bits));
    }
}

/// Decode `buf` to interleaved `f32` within `[-1, 1]`.
pub fn to_f32(buf: &[u8], format: &AudioFormat) -> Vec<f32> {
    let size = format.sample_size();
    if size == 0 {
        return Vec::new();
    }
    let scale = 1.0 / (sample_max(format.bits) as f64 + 1.0);
    buf.chunks_exact(size)
        .map(|s| (read(s, format.bits) as f64 * scale) as f32)
        .collect()
}

/// Encode interleaved `f32` samples to `bits`, saturating out-of-range values.
pub fn from_f32(samples: &[f32], bits: u8) -> Vec<u8> {
    let size = AudioFormat::new(1, bits, 1).sample_size();
    let mut out = vec![0u8; samples.len() * size];
    if size == 0 {
        return out;
    }
    let scale = sample_max(bits) as f64 + 1.0;
    for (dst, &v) in out.chunks_exact_mut(size).zip(samples) {
        let scaled = (v as f64 * scale).round() as i64;
        write(dst, bits, clamp(scaled, bits));
    }
    out
}
