//! A closable latch.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A one-shot completion signal.
///
/// `close` is idempotent; `wait` blocks until some thread has closed the
/// signal. Backs both the build completion signal (`Builder::run` closes it
/// exactly once) and the pull coordinator's per-reference waits.
#[derive(Debug, Default)]
pub struct Signal {
    closed: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the signal, releasing all waiters. Safe to call more than once.
    pub fn close(&self) {
        let mut closed = self.closed.lock().unwrap();
        *closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    /// Block until the signal is closed.
    pub fn wait(&self) {
        let mut closed = self.closed.lock().unwrap();
        while !*closed {
            closed = self.cond.wait(closed).unwrap();
        }
    }

    /// Block until the signal is closed or `timeout` elapses. Returns whether
    /// the signal was closed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut closed = self.closed.lock().unwrap();
        while !*closed {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.cond.wait_timeout(closed, deadline - now).unwrap();
            closed = guard;
        }
        true
    }
}
