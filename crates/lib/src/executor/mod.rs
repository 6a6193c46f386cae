//! The executor contract and backend selection.
//!
//! An executor owns the runtime-facing half of a build: the current image id,
//! container lifecycle, the commit protocol, and the persisted build cache.
//! The engine treats it as opaque; backends are selected by name, and the
//! in-memory recording executor in [`crate::testutil`] implements the same
//! contract for daemonless tests.

pub mod cache;
pub mod docker;

use luabox_core::{BuildContext, ContainerConfig, Error, Fingerprint, Result};

/// Hook executed between container creation and snapshot during a commit.
///
/// The hook runs with the freshly created container; failure aborts the
/// commit and leaves the current image id unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitHook {
    /// Attach stdout/stderr, start the container, stream its output between
    /// banner lines, and wait for a zero exit status.
    Run,
    /// Upload a tar archive into the container at `dest`.
    CopyInto { dest: String, archive: Vec<u8> },
}

/// The container-runtime backend contract.
///
/// All operations are synchronous from the caller's point of view; backends
/// honor the [`BuildContext`] for in-flight cancellation. A failed operation
/// never advances the current image id.
pub trait Executor: Send {
    /// The latest committed image id, if any.
    fn image_id(&self) -> Option<String>;

    /// Tag the current image with a human-readable name.
    fn tag(&mut self, name: &str) -> Result<()>;

    /// Probe the build cache for a step fingerprint.
    ///
    /// On a hit the executor adopts the cached image as current and treats
    /// `config` as materialized, then returns `true`. Cache entries are keyed
    /// by the parent image id as well as the fingerprint, so identical steps
    /// on divergent histories do not alias.
    fn check_cache(&mut self, fingerprint: &Fingerprint, config: &ContainerConfig)
        -> Result<bool>;

    /// Whether `reference` resolves against local images.
    fn image_present(&mut self, reference: &str) -> Result<bool>;

    /// Fetch `reference` from its registry, streaming progress records.
    fn pull(&mut self, reference: &str) -> Result<()>;

    /// Resolve `reference` to an image id and adopt it as the current image,
    /// recording `config` as its materialized configuration.
    fn use_image(&mut self, reference: &str, config: &ContainerConfig) -> Result<String>;

    /// Finalize `config` into an image.
    ///
    /// A no-op returning the current id when `config` already matches the
    /// materialized configuration; otherwise commits a configuration-only
    /// layer.
    fn make_image(&mut self, config: &ContainerConfig) -> Result<String>;

    /// The commit protocol: create a container from the current image with
    /// `config`, run the hook if given, snapshot to a new image, record the
    /// cache entry, adopt the new id, and remove the container.
    fn commit(
        &mut self,
        config: &ContainerConfig,
        fingerprint: &Fingerprint,
        hook: Option<CommitHook>,
    ) -> Result<String>;

    /// Record `config` as already materialized in the current image, making
    /// a matching `make_image` a no-op. Used by verbs that commit with a
    /// transient configuration override and restore it afterwards.
    fn sync_config(&mut self, config: &ContainerConfig);

    /// Swap the cancellation context for subsequent operations.
    fn set_context(&mut self, context: BuildContext);
}

/// Construct the backend registered under `name`.
///
/// `"docker"` is currently the only backend. `tty` controls progress
/// rendering during pulls.
pub fn new_executor(name: &str, context: BuildContext, tty: bool) -> Result<Box<dyn Executor>> {
    match name {
        "docker" => Ok(Box::new(docker::DockerExecutor::new(context, tty)?)),
        other => Err(Error::UnknownBackend(other.to_string())),
    }
}
