//! Shared state between the capture loop, the consumer and the controlling thread.
//!
//! One [`CaptureControl`] is created per process and handed out as an `Arc`.
//! It carries the stop signal, the one-shot convert trigger, and the capture
//! state the exclusive-write protocol is built on.
//!
//! The capture loop changes `acquisition_open` only while holding the state
//! lock, after reading `pause_requests` under the same lock. A writer that
//! raised a pause request and then sees `acquisition_open == false` therefore
//! knows acquisition stays closed until its [`PauseGuard`] is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::CaptureError;

/// Phase of the capture loop, derived from [`CaptureState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Disconnected,
    Connecting,
    Open,
    Paused,
}

/// Connection and acquisition state published by the capture loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureState {
    pub connecting: bool,
    pub connected: bool,
    pub acquisition_open: bool,
    /// Writers currently holding the exclusive section.
    pub pause_requests: usize,
}

impl CaptureState {
    pub fn pause_requested(&self) -> bool {
        self.pause_requests > 0
    }

    /// Whether acquisition should be open right now.
    pub fn wants_acquisition(&self) -> bool {
        self.connected && !self.pause_requested()
    }

    pub fn phase(&self) -> CapturePhase {
        if self.connected {
            if self.acquisition_open {
                CapturePhase::Open
            } else {
                CapturePhase::Paused
            }
        } else if self.connecting {
            CapturePhase::Connecting
        } else {
            CapturePhase::Disconnected
        }
    }
}

pub struct CaptureControl {
    stop: AtomicBool,
    convert_next: AtomicBool,
    state: Mutex<CaptureState>,
    changed: Condvar,
    idle: Duration,
}

impl CaptureControl {
    pub fn new(idle: Duration) -> Self {
        Self {
            stop: AtomicBool::new(false),
            convert_next: AtomicBool::new(false),
            state: Mutex::new(CaptureState::default()),
            changed: Condvar::new(),
            idle,
        }
    }

    pub fn idle(&self) -> Duration {
        self.idle
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.changed.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Arm the one-shot conversion of the next consumed frame.
    pub fn request_convert(&self) {
        self.convert_next.store(true, Ordering::Release);
    }

    /// Consume the convert trigger, returning whether it was armed.
    pub fn take_convert(&self) -> bool {
        self.convert_next.swap(false, Ordering::AcqRel)
    }

    pub fn state(&self) -> CaptureState {
        *self.lock_state()
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a state change and wake anyone waiting on it.
    pub(crate) fn update(&self, f: impl FnOnce(&mut CaptureState)) {
        let mut state = self.lock_state();
        f(&mut state);
        drop(state);
        self.changed.notify_all();
    }

    pub(crate) fn notify(&self) {
        self.changed.notify_all();
    }

    /// Raise a pause request without waiting for acquisition to close.
    ///
    /// Used by the capture thread itself, which closes acquisition directly.
    pub fn pause(&self) -> PauseGuard<'_> {
        self.update(|state| state.pause_requests += 1);
        PauseGuard { control: self }
    }

    /// Enter the exclusive-write section from a thread other than the capture loop.
    ///
    /// Raises a pause request, then waits in idle slices until the capture loop
    /// reports acquisition closed. Dropping the guard resumes acquisition
    /// asynchronously.
    pub fn acquire_exclusive(&self) -> Result<PauseGuard<'_>, CaptureError> {
        let guard = self.pause();
        let started = Instant::now();

        let mut state = self.lock_state();
        while state.acquisition_open {
            if self.is_stopped() {
                drop(state);
                return Err(CaptureError::Stopped);
            }
            state = self
                .changed
                .wait_timeout(state, self.idle)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        drop(state);

        debug!(waited = ?started.elapsed(), "Exclusive write section entered");
        Ok(guard)
    }

    pub fn idle_sleep(&self) {
        thread::sleep(self.idle);
    }

    /// Sleep for `duration` in idle slices, returning early once stopped.
    pub fn sleep_unless_stopped(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(self.idle.min(deadline - now));
        }
    }
}

impl Default for CaptureControl {
    fn default() -> Self {
        Self::new(Duration::from_millis(25))
    }
}

/// Held while a writer needs acquisition closed.
#[must_use = "the pause is released when the guard is dropped"]
pub struct PauseGuard<'a> {
    control: &'a CaptureControl,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.control
            .update(|state| state.pause_requests = state.pause_requests.saturating_sub(1));
    }
}
