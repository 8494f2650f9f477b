//! Shutdown coordination between the poll thread and the control loop
//!
//! Every participant that detects a terminal condition calls
//! [`ExitSignal::signal`]. The first reason recorded wins; later signals only
//! wake waiters again. The poll thread checks [`ExitSignal::is_set`] between
//! event drains, the control loop sleeps on [`ExitSignal::wait_timeout`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Exit code used when the interrupt pipeline fails or cannot resubmit
pub const TRANSFER_FAILED: i32 = 2;

/// Why the session is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Orderly shutdown (Ctrl+C, caller request)
    Requested,
    /// Fatal condition carrying a non-zero error code
    Fatal(i32),
}

impl ExitReason {
    /// Fatal reason; a zero code is normalized to 1 so it still reads as failure
    pub fn fatal(code: i32) -> Self {
        if code == 0 {
            ExitReason::Fatal(1)
        } else {
            ExitReason::Fatal(code)
        }
    }

    /// Process exit status for this reason
    pub fn exit_code(&self) -> u8 {
        match self {
            ExitReason::Requested => 0,
            ExitReason::Fatal(code) => u8::try_from(code.unsigned_abs()).unwrap_or(u8::MAX),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ExitReason::Fatal(_))
    }
}

/// Process-wide exit flag with condition notification
#[derive(Debug, Default)]
pub struct ExitSignal {
    /// Fast path for the poll loop
    exiting: AtomicBool,
    reason: Mutex<Option<ExitReason>>,
    cond: Condvar,
}

impl ExitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `reason` unless one is already recorded, then wake all waiters
    ///
    /// Returns `true` if this call recorded the reason.
    pub fn signal(&self, reason: ExitReason) -> bool {
        let mut guard = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        let recorded = if guard.is_none() {
            *guard = Some(reason);
            self.exiting.store(true, Ordering::Release);
            debug!("Exit signalled: {:?}", reason);
            true
        } else {
            false
        };
        drop(guard);
        self.cond.notify_all();
        recorded
    }

    /// Non-blocking check
    pub fn is_set(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    /// Recorded reason, if any
    pub fn reason(&self) -> Option<ExitReason> {
        *self.reason.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until signalled or `timeout` elapses
    ///
    /// Returns the reason if the signal was observed. A timeout too large
    /// to represent as a deadline waits without one.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExitReason> {
        let mut guard = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return *guard;
        }
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            drop(guard);
            return Some(self.wait());
        };
        loop {
            if guard.is_some() {
                return *guard;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            guard = self
                .cond
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Block until signalled
    pub fn wait(&self) -> ExitReason {
        let mut guard = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(reason) = *guard {
                return reason;
            }
            guard = self
                .cond
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
