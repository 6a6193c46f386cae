//! luabox-core: foundation types for the luabox image build engine.
//!
//! This crate provides the pieces of the engine that do not depend on the
//! Lua runtime or on any container backend:
//! - `ContainerConfig`: the mutable record describing the next container
//! - `Fingerprint`: deterministic cache keys for build steps
//! - `BuildContext`: cancellation/deadline propagation
//! - `Signal`: a closable latch backing build completion and pull waits
//! - `PullCoordinator`: single-flight deduplication of image pulls
//!
//! The `luabox-lib` crate builds the evaluator, verbs, and executor on top
//! of these types.

mod config;
mod context;
mod error;
mod fingerprint;
mod pull;
mod signal;

pub use config::ContainerConfig;
pub use context::BuildContext;
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use pull::PullCoordinator;
pub use signal::Signal;
