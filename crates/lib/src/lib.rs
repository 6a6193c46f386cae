//! luabox: build container images from Lua scripts.
//!
//! A build script is a Lua program whose statements describe, step by step,
//! how to construct an image:
//!
//! ```lua
//! from "alpine"
//! env { PATH = "/usr/local/bin:/usr/bin:/bin" }
//! run "apk add --no-cache curl"
//! copy("entrypoint.sh", "/entrypoint.sh")
//! entrypoint("/entrypoint.sh")
//! ```
//!
//! Each committing verb snapshots the mutated container configuration as a
//! new layer; identical steps are skipped on re-runs through a
//! content-addressed cache maintained by the executor. Concurrent builds in
//! one process deduplicate image pulls through a shared [`PullCoordinator`].
//!
//! [`Builder`] owns the embedded evaluator, the container configuration, and
//! the executor handle; [`testutil`] provides an in-memory recording executor
//! so builds can be exercised without a container daemon.

pub mod archive;
pub mod builder;
pub mod executor;
pub mod lua;
pub mod testutil;

mod state;
mod verbs;

pub use builder::{BuildConfig, BuildResult, Builder};
pub use executor::{new_executor, CommitHook, Executor};
pub use luabox_core::{
    BuildContext, ContainerConfig, Error, Fingerprint, PullCoordinator, Result, Signal,
};
