//! Shared build state captured by the verb closures.

use std::sync::{Arc, Mutex};

use mlua::{Function, Value};

use luabox_core::{BuildContext, ContainerConfig, PullCoordinator};

use crate::executor::Executor;

/// Everything a verb needs to do its job.
///
/// The Lua-registered verb closures each hold an `Arc<Engine>`. Locks are
/// never held across a call back into Lua (block invocation) or across each
/// other, so a verb running inside a scoped block can re-enter the engine
/// freely.
pub(crate) struct Engine {
    pub state: Mutex<BuildState>,
    pub executor: Mutex<Box<dyn Executor>>,
    pub pulls: Arc<PullCoordinator>,
}

/// Mutable per-builder state.
pub(crate) struct BuildState {
    /// The container configuration the next commit will snapshot.
    pub config: ContainerConfig,
    /// Cancellation context probed before each step.
    pub context: BuildContext,
    /// Hook registered by the `after` verb, invoked post-finalize.
    pub after: Option<Function>,
    /// Last non-nil value produced by a wrapped verb during the current run.
    /// Lua discards the results of statement-position calls, so the step
    /// wrapper records them here for the build result.
    pub last_value: Option<Value>,
}

impl Engine {
    pub fn new(
        executor: Box<dyn Executor>,
        pulls: Arc<PullCoordinator>,
        context: BuildContext,
    ) -> Self {
        Self {
            state: Mutex::new(BuildState {
                config: ContainerConfig::new(),
                context,
                after: None,
                last_value: None,
            }),
            executor: Mutex::new(executor),
            pulls,
        }
    }

    /// Snapshot the current container configuration.
    pub fn config(&self) -> ContainerConfig {
        self.state.lock().unwrap().config.clone()
    }
}
