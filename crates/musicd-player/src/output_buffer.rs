//! Ring of fixed-size PCM chunks between the decoder and player threads.
//!
//! The decoder is the only writer: it fills the tail chunk at `end` and
//! commits it (advances `end`) once full. The player is the only reader: it
//! consumes at `begin`. `begin == end` means empty, and one slot always stays
//! free, so at most `capacity - 1` chunks are visible to the reader. The
//! partially filled tail is invisible until it fills up or is flushed.
//!
//! Blocking is done with two [`Notify`] primitives: the writer waits on the
//! decoder notify when the ring is full, the reader on the player notify when
//! it needs more data.

use std::sync::{Arc, Mutex};

use crate::audio_format::AudioFormat;
use crate::crossfade::cross_fade_apply;
use crate::decoder_control::{DecoderCommandKind, DecoderControl};
use crate::notify::{Notify, lock};

/// Minimum ring size in chunks.
pub const MIN_CHUNKS: usize = 4;

/// Default payload size per chunk in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// One fixed-size block of PCM, stamped with the song time of its first
/// byte and the latest bit rate reported for it.
#[derive(Clone, Debug)]
pub struct Chunk {
    data: Box<[u8]>,
    len: usize,
    bit_rate: u16,
    time: f32,
}

impl Chunk {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
            len: 0,
            bit_rate: 0,
            time: 0.0,
        }
    }

    /// Filled part of the payload.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    /// Bit rate (kbit/s) reported by the decoder for this audio.
    pub fn bit_rate(&self) -> u16 {
        self.bit_rate
    }

    /// Song position in seconds of this audio.
    pub fn time(&self) -> f32 {
        self.time
    }

    /// Fill with `len` bytes of silence.
    pub fn set_silence(&mut self, len: usize) {
        self.len = len.min(self.data.len());
        self.data[..self.len].fill(0);
        self.bit_rate = 0;
    }

    fn reset(&mut self) {
        self.len = 0;
        self.bit_rate = 0;
        self.time = 0.0;
    }

    /// Mix `newer` into this chunk with weight `k / n` on `newer`.
    pub(crate) fn mix_from(&mut self, newer: &Chunk, format: &AudioFormat, k: u32, n: u32) {
        self.len = cross_fade_apply(&mut self.data, self.len, newer.data(), format, k, n);
    }
}

/// Outcome of [`OutputBuffer::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendResult {
    /// All bytes were placed.
    Sent,
    /// Interrupted by a pending STOP (`OUTPUT_BUFFER_DC_STOP`).
    Stop,
    /// Interrupted by a pending SEEK (`OUTPUT_BUFFER_DC_SEEK`).
    Seek,
}

#[derive(Debug)]
struct Ring {
    chunks: Vec<Chunk>,
    begin: usize,
    end: usize,
}

impl Ring {
    fn next(&self, i: usize) -> usize {
        (i + 1) % self.chunks.len()
    }

    fn available(&self) -> usize {
        (self.end + self.chunks.len() - self.begin) % self.chunks.len()
    }

    fn is_full(&self) -> bool {
        self.next(self.end) == self.begin
    }
}

#[derive(Debug)]
pub struct OutputBuffer {
    ring: Mutex<Ring>,
    capacity: usize,
    chunk_size: usize,
    decoder_notify: Arc<Notify>,
    player_notify: Arc<Notify>,
}

/// Number of chunks needed to hold `seconds` of `format`.
pub fn chunks_for_duration(seconds: f32, format: &AudioFormat, chunk_size: usize) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds as f64
    } else {
        2.0
    };
    let bytes = secs * format.bytes_per_second();
    ((bytes / chunk_size.max(1) as f64).ceil() as usize).max(MIN_CHUNKS)
}

impl OutputBuffer {
    /// Allocate a ring of `capacity` chunks of `chunk_size` bytes each.
    pub fn new(capacity: usize, chunk_size: usize) -> Self {
        let capacity = capacity.max(2);
        let chunk_size = chunk_size.max(1);
        let chunks = (0..capacity).map(|_| Chunk::new(chunk_size)).collect();
        tracing::debug!(capacity, chunk_size, "output buffer allocated");
        Self {
            ring: Mutex::new(Ring {
                chunks,
                begin: 0,
                end: 0,
            }),
            capacity,
            chunk_size,
            decoder_notify: Arc::new(Notify::new()),
            player_notify: Arc::new(Notify::new()),
        }
    }

    /// Total ring slots (one more than the visible maximum).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Notify the writer waits on while the ring is full.
    pub fn decoder_notify(&self) -> &Arc<Notify> {
        &self.decoder_notify
    }

    /// Notify the reader waits on for new chunks.
    pub fn player_notify(&self) -> &Arc<Notify> {
        &self.player_notify
    }

    /// Append `data` (already in the buffer format) to the tail.
    ///
    /// Each chunk is committed as soon as it is full. While the ring is full
    /// this blocks, and returns [`SendResult::Stop`] or [`SendResult::Seek`]
    /// as soon as the decoder has that command pending.
    pub fn send(&self, dc: &DecoderControl, data: &[u8], time: f32, bit_rate: u16) -> SendResult {
        let mut offset = 0;
        while offset < data.len() {
            loop {
                if !lock(&self.ring).is_full() {
                    break;
                }
                match dc.command() {
                    DecoderCommandKind::Stop => return SendResult::Stop,
                    DecoderCommandKind::Seek => return SendResult::Seek,
                    _ => {}
                }
                self.decoder_notify.wait();
            }

            let mut ring = lock(&self.ring);
            let end = ring.end;
            let chunk_size = self.chunk_size;
            let chunk = &mut ring.chunks[end];
            if chunk.len == 0 {
                chunk.time = time;
            }
            chunk.bit_rate = bit_rate;
            let n = (chunk_size - chunk.len).min(data.len() - offset);
            chunk.data[chunk.len..chunk.len + n].copy_from_slice(&data[offset..offset + n]);
            chunk.len += n;
            offset += n;
            if chunk.len == chunk_size {
                Self::commit(&mut ring);
                drop(ring);
                self.player_notify.signal();
            }
        }
        SendResult::Sent
    }

    fn commit(ring: &mut Ring) {
        let next = ring.next(ring.end);
        ring.end = next;
        ring.chunks[next].reset();
    }

    /// Make the partially filled tail chunk visible.
    pub fn flush(&self) {
        let mut ring = lock(&self.ring);
        let end = ring.end;
        if ring.chunks[end].len > 0 && !ring.is_full() {
            Self::commit(&mut ring);
            drop(ring);
            self.player_notify.signal();
        }
    }

    /// Drop every chunk, including the partial tail.
    pub fn clear(&self) {
        let mut ring = lock(&self.ring);
        ring.begin = ring.end;
        let end = ring.end;
        ring.chunks[end].reset();
        drop(ring);
        self.decoder_notify.signal();
    }

    pub fn is_empty(&self) -> bool {
        let ring = lock(&self.ring);
        ring.begin == ring.end
    }

    /// Number of committed chunks ready for the reader.
    pub fn available(&self) -> usize {
        lock(&self.ring).available()
    }

    /// Bytes written to the uncommitted tail chunk.
    pub fn pending_tail(&self) -> usize {
        let ring = lock(&self.ring);
        ring.chunks[ring.end].len
    }

    pub fn begin(&self) -> usize {
        lock(&self.ring).begin
    }

    pub fn end(&self) -> usize {
        lock(&self.ring).end
    }

    /// Distance from `begin` to absolute index `i`.
    pub fn relative(&self, i: usize) -> usize {
        let ring = lock(&self.ring);
        (i % self.capacity + self.capacity - ring.begin) % self.capacity
    }

    /// Absolute index of the chunk `rel` positions after `begin`.
    pub fn absolute(&self, rel: usize) -> usize {
        let ring = lock(&self.ring);
        (ring.begin + rel) % self.capacity
    }

    /// Run `f` on the committed chunk at absolute index `i`.
    pub fn get_chunk<R>(&self, i: usize, f: impl FnOnce(&Chunk) -> R) -> Option<R> {
        let ring = lock(&self.ring);
        let rel = (i % self.capacity + self.capacity - ring.begin) % self.capacity;
        if rel >= ring.available() {
            return None;
        }
        Some(f(&ring.chunks[i % self.capacity]))
    }

    /// Drop the head chunk.
    pub fn shift(&self) {
        self.skip(1);
    }

    /// Drop up to `n` chunks from the head; returns how many were dropped.
    pub fn skip(&self, n: usize) -> usize {
        let mut ring = lock(&self.ring);
        let n = n.min(ring.available());
        ring.begin = (ring.begin + n) % self.capacity;
        drop(ring);
        if n > 0 {
            self.decoder_notify.signal();
        }
        n
    }

    /// Swap the head chunk into `spare` and advance `begin`.
    ///
    /// Returns `false` (leaving `spare` untouched) when the ring is empty.
    pub fn take_head(&self, spare: &mut Chunk) -> bool {
        let mut ring = lock(&self.ring);
        if ring.begin == ring.end {
            return false;
        }
        let begin = ring.begin;
        std::mem::swap(&mut ring.chunks[begin], spare);
        if ring.chunks[begin].capacity() != self.chunk_size {
            ring.chunks[begin] = Chunk::new(self.chunk_size);
        }
        ring.chunks[begin].reset();
        ring.begin = ring.next(begin);
        drop(ring);
        self.decoder_notify.signal();
        true
    }

    /// Mix the committed chunk `other_rel` positions after `begin` into the
    /// head chunk with weight `k / n` on the newer chunk.
    ///
    /// Returns `false` when that chunk is not decoded yet.
    pub fn cross_fade_head(&self, other_rel: usize, k: u32, n: u32, format: &AudioFormat) -> bool {
        let mut ring = lock(&self.ring);
        if other_rel == 0 || other_rel >= ring.available() {
            return false;
        }
        let head = ring.begin;
        let other = (head + other_rel) % self.capacity;
        let (old, new) = pair_mut(&mut ring.chunks, head, other);
        old.mix_from(new, format, k, n);
        true
    }
}

fn pair_mut(chunks: &mut [Chunk], a: usize, b: usize) -> (&mut Chunk, &Chunk) {
    if a < b {
        let (lo, hi) = chunks.split_at_mut(b);
        (&mut lo[a], &hi[0])
    } else {
        let (lo, hi) = chunks.split_at_mut(a);
        (&mut hi[0], &lo[b])
    }
}
