use crate::audio_format::AudioFormat;
use crate::pcm::sample;

/// Mix `b` into `a` in place: `a := a*(1-w) + b*w`, saturating.
///
/// `a` is the full backing storage of the older chunk and `a_len` the number
/// of bytes it holds. When `b` is longer, the missing tail of `a` counts as
/// silence. Returns the new length of `a`, which is `max(a_len, b.len())`.
pub fn pcm_mix(a: &mut [u8], a_len: usize, b: &[u8], format: &AudioFormat, w: f32) -> usize {
    let size = format.sample_size();
    let new_len = a_len.max(b.len()).min(a.len());
    if size == 0 {
        return new_len;
    }
    a[a_len.min(new_len)..new_len].fill(0);

    let w = w.clamp(0.0, 1.0) as f64;
    let keep = 1.0 - w;
    let bits = format.bits;
    for (i, dst) in a[..new_len].chunks_exact_mut(size).enumerate() {
        let off = i * size;
        let old = sample::read(dst, bits) as f64;
        let new = if off + size <= b.len() {
            sample::read(&b[off..], bits) as f64
        } else {
            0.0
        };
        let mixed = (old * keep + new * w).round() as i64;
        sample::write(dst, bits, sample::clamp(mixed, bits));
    }
    new_len
}
