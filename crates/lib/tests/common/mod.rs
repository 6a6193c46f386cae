//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use luabox_lib::builder::{BuildConfig, Builder};
use luabox_lib::testutil::{Ledger, RecordingExecutor};
use luabox_lib::PullCoordinator;

/// A build configuration with an isolated pull coordinator.
pub fn config() -> BuildConfig {
    BuildConfig {
        file_name: "test.lua".to_string(),
        tty: false,
        pulls: Arc::new(PullCoordinator::new()),
        ..Default::default()
    }
}

/// A builder wired to a recording executor over `ledger`.
pub fn builder_with(ledger: &Arc<Mutex<Ledger>>) -> Builder {
    let executor = RecordingExecutor::with_ledger(Arc::clone(ledger));
    Builder::with_executor(config(), Box::new(executor)).unwrap()
}

/// A builder with a fresh ledger.
pub fn builder() -> (Builder, Arc<Mutex<Ledger>>) {
    let ledger = Ledger::shared();
    let builder = builder_with(&ledger);
    (builder, ledger)
}
