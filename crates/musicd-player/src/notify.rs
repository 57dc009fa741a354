//! Wake-up primitive shared by the decoder and player threads.
//!
//! A [`Notify`] carries one pending flag under a mutex. `signal()` sets it and
//! wakes the waiter; `wait()` blocks until it is set and clears it. A signal
//! issued while nobody waits is remembered, so a check-then-wait sequence
//! never loses a wake-up.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Lock `m`, recovering the guard if a previous holder panicked.
///
/// The pipeline state behind these mutexes stays consistent between
/// statements, so a poisoned lock is still usable.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct Notify {
    pending: Mutex<bool>,
    cv: Condvar,
}

impl Notify {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the waiting thread (or the next one to call [`Notify::wait`]).
    pub fn signal(&self) {
        let mut pending = lock(&self.pending);
        *pending = true;
        drop(pending);
        self.cv.notify_one();
    }

    /// Block until signalled, then consume the signal.
    pub fn wait(&self) {
        let mut pending = lock(&self.pending);
        while !*pending {
            pending = self
                .cv
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *pending = false;
    }
}
