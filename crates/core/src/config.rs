//! The mutable container configuration record.
//!
//! One `ContainerConfig` is owned by each builder. Verbs mutate it as the
//! script executes; each committing step snapshots it into the next layer.

use serde::{Deserialize, Serialize};

/// Configuration for the next container the executor will create.
///
/// `env` preserves insertion order and allows duplicate keys; the runtime
/// applies them in order, so the last occurrence of a key wins. `user` and
/// `inside_dir` are only non-empty inside their respective scoped blocks
/// (`with_user`, `inside`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Entrypoint the container starts with.
    pub entrypoint: Vec<String>,
    /// Command passed to the entrypoint.
    pub cmd: Vec<String>,
    /// Environment as `KEY=VALUE` strings, insertion order preserved.
    pub env: Vec<String>,
    /// User to run as; empty inherits the image default.
    pub user: String,
    /// Working directory; empty uses the runtime default.
    pub working_dir: String,
    /// Allocate a pseudo-TTY.
    pub tty: bool,
    /// Attach stdout when running.
    pub attach_stdout: bool,
    /// Attach stderr when running.
    pub attach_stderr: bool,
    /// Transient working-directory override scoped to an `inside` block.
    pub inside_dir: String,
}

impl ContainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// The directory a step should operate in: the `inside` override when one
    /// is active, the configured working directory otherwise.
    pub fn effective_dir(&self) -> &str {
        if self.inside_dir.is_empty() {
            &self.working_dir
        } else {
            &self.inside_dir
        }
    }

    /// Append a `KEY=VALUE` environment entry.
    pub fn push_env(&mut self, key: &str, value: &str) {
        self.env.push(format!("{}={}", key, value));
    }
}
