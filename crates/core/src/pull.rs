//! Single-flight coordination of image pulls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::Result;
use crate::signal::Signal;

static GLOBAL: Lazy<Arc<PullCoordinator>> = Lazy::new(|| Arc::new(PullCoordinator::new()));

/// Deduplicates concurrent pulls of the same image reference.
///
/// The first caller for a reference installs a completion signal and performs
/// the fetch; concurrent callers for the same reference wait on the signal
/// and skip the fetch entirely. Pulls of distinct references proceed in
/// parallel. Builders in one process share the coordinator handed to their
/// `BuildConfig`, which defaults to the process-wide instance.
#[derive(Debug, Default)]
pub struct PullCoordinator {
    inflight: Mutex<HashMap<String, Arc<Signal>>>,
}

impl PullCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide coordinator shared by default-configured builders.
    pub fn global() -> Arc<PullCoordinator> {
        Arc::clone(&GLOBAL)
    }

    /// Run `fetch` for `reference` at most once concurrently.
    ///
    /// Returns `Ok(true)` when this caller performed the fetch, `Ok(false)`
    /// when another caller's in-flight fetch was awaited instead. A failed
    /// fetch still releases the waiters; they resolve the reference against
    /// local state and surface their own error if it is missing.
    pub fn coordinate<F>(&self, reference: &str, fetch: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        let waiter = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(reference) {
                Some(signal) => Some(Arc::clone(signal)),
                None => {
                    inflight.insert(reference.to_string(), Arc::new(Signal::new()));
                    None
                }
            }
        };

        if let Some(signal) = waiter {
            debug!(reference, "pull already in flight, waiting");
            signal.wait();
            return Ok(false);
        }

        let result = fetch();

        let mut inflight = self.inflight.lock().unwrap();
        if let Some(signal) = inflight.remove(reference) {
            signal.close();
        }

        result.map(|_| true)
    }

    /// Drop every in-flight record, releasing any waiters. Test support.
    pub fn reset(&self) {
        let mut inflight = self.inflight.lock().unwrap();
        for signal in inflight.values() {
            signal.close();
        }
        inflight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn single_caller_fetches() {
        let coordinator = PullCoordinator::new();
        let fetched = coordinator.coordinate("alpine", || Ok(())).unwrap();
        assert!(fetched);
        assert!(coordinator.inflight.lock().unwrap().is_empty());
    }

    #[test]
    fn concurrent_callers_fetch_once() {
        let coordinator = Arc::new(PullCoordinator::new());
        let fetches = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(std::sync::Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                let fetches = Arc::clone(&fetches);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    coordinator
                        .coordinate("alpine", || {
                            fetches.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(())
                        })
                        .unwrap()
                })
            })
            .collect();

        let leaders: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();

        // All callers race through the barrier; the 50ms fetch keeps every
        // follower inside the in-flight window, so exactly one leads.
        assert_eq!(leaders, 1);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(coordinator.inflight.lock().unwrap().is_empty());
    }

    #[test]
    fn distinct_references_fetch_independently() {
        let coordinator = PullCoordinator::new();
        assert!(coordinator.coordinate("alpine", || Ok(())).unwrap());
        assert!(coordinator.coordinate("debian", || Ok(())).unwrap());
    }

    #[test]
    fn failed_fetch_releases_waiters() {
        let coordinator = Arc::new(PullCoordinator::new());
        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                // Give the leader time to install the signal.
                thread::sleep(Duration::from_millis(10));
                coordinator.coordinate("alpine", || Ok(()))
            })
        };

        let result = coordinator.coordinate("alpine", || {
            thread::sleep(Duration::from_millis(50));
            Err(crate::Error::Executor("network down".to_string()))
        });
        assert!(result.is_err());

        // The waiter must not hang, whichever side led.
        waiter.join().unwrap().unwrap();
        assert!(coordinator.inflight.lock().unwrap().is_empty());
    }

    #[test]
    fn reset_clears_inflight_records() {
        let coordinator = PullCoordinator::new();
        coordinator
            .inflight
            .lock()
            .unwrap()
            .insert("stale".to_string(), Arc::new(Signal::new()));
        coordinator.reset();
        assert!(coordinator.inflight.lock().unwrap().is_empty());
    }
}
