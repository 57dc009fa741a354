//! Thread-safe bounded queue of interleaved `f32` samples feeding the CPAL
//! callback.
//!
//! The output thread pushes converted chunks with
//! [`SharedAudio::push_interleaved_blocking`], which paces the player to the
//! device clock. The callback drains it without blocking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::notify::lock;

/// Bounded sample queue shared between the output thread and the callback.
///
/// A `done` flag is stored under the same mutex as the queue so closing
/// cannot race a blocked push.
pub struct SharedAudio {
    channels: usize,
    inner: Mutex<SharedInner>,
    cv: Condvar,
    max_buffered_samples: usize,
    low_watermark_ms: AtomicU64,
}

struct SharedInner {
    queue: VecDeque<f32>,
    done: bool,
}

/// Queue capacity in samples for `buffer_seconds` of `rate_hz` audio.
///
/// Non-finite or non-positive durations fall back to two seconds.
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}

impl SharedAudio {
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(SharedInner {
                queue: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(channels),
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Maximum buffered frames.
    pub fn max_frames(&self) -> usize {
        self.max_buffered_samples / self.channels
    }

    /// Current buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        lock(&self.inner).queue.len() / self.channels
    }

    pub fn is_done(&self) -> bool {
        lock(&self.inner).done
    }

    /// Mark the queue as finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        lock(&self.inner).done = true;
        self.cv.notify_all();
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        lock(&self.inner).queue.clear();
        self.cv.notify_all();
    }

    fn wait<'a>(&self, g: MutexGuard<'a, SharedInner>) -> MutexGuard<'a, SharedInner> {
        self.cv.wait(g).unwrap_or_else(PoisonError::into_inner)
    }

    /// Push interleaved samples, blocking while the queue is full.
    ///
    /// Returns early, dropping the remainder, if the queue is closed.
    pub fn push_interleaved_blocking(&self, samples: &[f32]) {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = lock(&self.inner);

            while g.queue.len() >= self.max_buffered_samples && !g.done {
                g = self.wait(g);
            }
            if g.done {
                return;
            }

            let room = self.max_buffered_samples - g.queue.len();
            let n = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + n]);
            offset += n;

            drop(g);
            self.cv.notify_all();
        }
    }

    /// Pop up to `max_frames` whole frames without blocking.
    ///
    /// Returns `None` if no complete frame is buffered.
    pub fn pop(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = lock(&self.inner);

        let available_frames = g.queue.len() / self.channels;
        let take_samples = available_frames.min(max_frames) * self.channels;
        if take_samples == 0 {
            return None;
        }

        let out: Vec<f32> = g.queue.drain(..take_samples).collect();
        let queued = g.queue.len();
        drop(g);
        self.cv.notify_all();
        self.log_low_watermark(queued);
        Some(out)
    }

    fn log_low_watermark(&self, queued: usize) {
        let threshold = (self.max_buffered_samples / 8).max(self.channels * 16);
        if queued > 0 && queued < threshold {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_millis(0))
                .as_millis() as u64;
            let last = self.low_watermark_ms.load(Ordering::Relaxed);
            if now.saturating_sub(last) > 1000 {
                self.low_watermark_ms.store(now, Ordering::Relaxed);
                tracing::debug!(
                    queued_samples = queued,
                    threshold_samples = threshold,
                    "audio queue low watermark"
                );
            }
        }
    }

    /// Block until the queue is empty or `timeout` elapses.
    ///
    /// Returns `true` if the queue drained.
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = lock(&self.inner);
        while !g.queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (ng, _) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
        true
    }
}
