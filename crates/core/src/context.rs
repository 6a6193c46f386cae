//! Cancellation and deadline propagation.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// The cancellation context threaded through a build.
///
/// Wraps a `CancellationToken` plus an optional deadline. The builder probes
/// it before dispatching each step; the executor races in-flight daemon calls
/// against it. Cloning shares the underlying token, so cancelling any clone
/// cancels them all.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Request cancellation of everything holding this context.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check whether the context is still live.
    ///
    /// Returns `Err(Cancelled)` after `cancel()`, `Err(DeadlineExceeded)`
    /// once the deadline has passed, `Ok(())` otherwise.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded);
            }
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_live() {
        let ctx = BuildContext::new();
        assert!(ctx.check().is_ok());
        assert!(!ctx.is_done());
    }

    #[test]
    fn cancel_is_observed_by_clones() {
        let ctx = BuildContext::new();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(matches!(clone.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn past_deadline_reports_exceeded() {
        let ctx = BuildContext::with_deadline(Instant::now() - Duration::from_secs(1));
        assert!(matches!(ctx.check(), Err(Error::DeadlineExceeded)));
    }

    #[test]
    fn future_deadline_is_live() {
        let ctx = BuildContext::with_timeout(Duration::from_secs(60));
        assert!(ctx.check().is_ok());
    }
}
