//! The Docker backend.
//!
//! Wraps the Docker Engine API (via `bollard`) behind the synchronous
//! [`Executor`] contract. A private current-thread tokio runtime drives the
//! async client; every daemon call races against the build's cancellation
//! token and deadline, so cancelling mid-commit surfaces the context error
//! without advancing the image id.

use std::io::Write as _;

use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, RemoveContainerOptions,
    StartContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use bollard::image::{CommitContainerOptions, CreateImageOptions, TagImageOptions};
use bollard::models::CreateImageInfo;
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, warn};

use luabox_core::{BuildContext, ContainerConfig, Error, Fingerprint, Result};

use super::cache::CacheIndex;
use super::{CommitHook, Executor};

/// Executor backed by the local Docker daemon.
pub struct DockerExecutor {
    docker: Docker,
    runtime: tokio::runtime::Runtime,
    context: BuildContext,
    cache: CacheIndex,
    image_id: Option<String>,
    /// Configuration known to be materialized in the current image; when the
    /// builder's config still matches, `make_image` is a no-op.
    materialized: Option<ContainerConfig>,
    tty: bool,
}

impl DockerExecutor {
    pub fn new(context: BuildContext, tty: bool) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Executor(e.to_string()))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            docker,
            runtime,
            context,
            cache: CacheIndex::open(CacheIndex::default_path()),
            image_id: None,
            materialized: None,
            tty,
        })
    }

    /// Drive a daemon call to completion, racing it against cancellation and
    /// the deadline.
    fn block<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        self.context.check()?;
        let token = self.context.token().clone();
        let deadline = self.context.deadline();
        self.runtime.block_on(async move {
            let expiry = async move {
                match deadline {
                    Some(deadline) => {
                        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
                    }
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = token.cancelled() => Err(Error::Cancelled),
                _ = expiry => Err(Error::DeadlineExceeded),
                result = fut => result,
            }
        })
    }

    fn commit_inner(
        &mut self,
        config: &ContainerConfig,
        fingerprint: Option<&Fingerprint>,
        hook: Option<CommitHook>,
    ) -> Result<String> {
        let parent = self.image_id.clone();
        let create_config = container_config(config, parent.as_deref());

        let created = self.block(async {
            self.docker
                .create_container(None::<CreateContainerOptions<String>>, create_config)
                .await
                .map_err(exec_err)
        })?;
        for warning in &created.warnings {
            warn!(container = %created.id, "{}", warning);
        }

        let image = match self.run_commit(&created.id, config, hook) {
            Ok(image) => image,
            Err(e) => {
                // Tear down the scratch container; the commit failure wins.
                if let Err(remove_err) = self.remove_build_container(&created.id) {
                    warn!(container = %created.id, "failed to remove container: {}", remove_err);
                }
                return Err(e);
            }
        };

        // The layer exists now: record it and adopt it before touching the
        // container again, so a removal failure cannot orphan it.
        if let Some(fingerprint) = fingerprint {
            self.cache
                .record(parent.as_deref().unwrap_or_default(), fingerprint, &image)?;
        }
        self.image_id = Some(image.clone());
        self.materialized = Some(config.clone());
        debug!(image = %image, "committed layer");

        self.remove_build_container(&created.id)?;
        Ok(image)
    }

    fn remove_build_container(&self, container_id: &str) -> Result<()> {
        self.block(async {
            self.docker
                .remove_container(
                    container_id,
                    Some(RemoveContainerOptions { force: true, ..Default::default() }),
                )
                .await
                .map_err(exec_err)
        })
    }

    /// Run the hook against the created container, then snapshot it.
    fn run_commit(
        &self,
        container_id: &str,
        config: &ContainerConfig,
        hook: Option<CommitHook>,
    ) -> Result<String> {
        match hook {
            Some(CommitHook::Run) => self.run_hook(container_id)?,
            Some(CommitHook::CopyInto { dest, archive }) => self.block(async move {
                self.docker
                    .upload_to_container(
                        container_id,
                        Some(UploadToContainerOptions { path: dest, ..Default::default() }),
                        archive.into(),
                    )
                    .await
                    .map_err(exec_err)
            })?,
            None => {}
        }

        let options = CommitContainerOptions {
            container: container_id.to_string(),
            pause: true,
            ..Default::default()
        };
        let commit_config = container_config(config, None);
        let commit = self.block(async {
            self.docker
                .commit_container(options, commit_config)
                .await
                .map_err(exec_err)
        })?;
        commit
            .id
            .ok_or_else(|| Error::Executor("commit returned no image id".to_string()))
    }

    /// The default attach/start/wait hook used by `run`.
    fn run_hook(&self, container_id: &str) -> Result<()> {
        self.block(async {
            let attach = self
                .docker
                .attach_container(
                    container_id,
                    Some(AttachContainerOptions::<String> {
                        stdout: Some(true),
                        stderr: Some(true),
                        stream: Some(true),
                        ..Default::default()
                    }),
                )
                .await
                .map_err(exec_err)?;

            self.docker
                .start_container(container_id, None::<StartContainerOptions<String>>)
                .await
                .map_err(exec_err)?;

            println!("------ BEGIN OUTPUT ------");
            let mut output = attach.output;
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(log) => print!("{}", log),
                    Err(e) => return Err(exec_err(e)),
                }
            }
            println!("------ END OUTPUT ------");

            let mut wait = self
                .docker
                .wait_container(container_id, None::<WaitContainerOptions<String>>);
            let status = match wait.next().await {
                Some(Ok(response)) => response.status_code,
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
                Some(Err(e)) => return Err(exec_err(e)),
                None => 0,
            };
            if status != 0 {
                return Err(Error::Executor(format!(
                    "command exited with status {} for container {:?}",
                    status, container_id
                )));
            }
            Ok(())
        })
    }
}

impl Executor for DockerExecutor {
    fn image_id(&self) -> Option<String> {
        self.image_id.clone()
    }

    fn tag(&mut self, name: &str) -> Result<()> {
        let image = self
            .image_id
            .clone()
            .ok_or_else(|| Error::Executor("no image to tag".to_string()))?;
        let (repo, tag) = split_reference(name);
        self.block(async {
            self.docker
                .tag_image(&image, Some(TagImageOptions { repo, tag }))
                .await
                .map_err(exec_err)
        })
    }

    fn check_cache(
        &mut self,
        fingerprint: &Fingerprint,
        config: &ContainerConfig,
    ) -> Result<bool> {
        let parent = self.image_id.clone().unwrap_or_default();
        let cached = match self.cache.lookup(&parent, fingerprint) {
            Some(id) => id.to_string(),
            None => return Ok(false),
        };

        // A cached id is only good while the daemon still has the image.
        let exists = self.block(async {
            Ok(self.docker.inspect_image(&cached).await.is_ok())
        })?;
        if !exists {
            self.cache.forget(&parent, fingerprint)?;
            return Ok(false);
        }

        debug!(image = %cached, fingerprint = %fingerprint, "cache hit");
        self.image_id = Some(cached);
        self.materialized = Some(config.clone());
        Ok(true)
    }

    fn image_present(&mut self, reference: &str) -> Result<bool> {
        self.block(async { Ok(self.docker.inspect_image(reference).await.is_ok()) })
    }

    fn pull(&mut self, reference: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        let tty = self.tty;
        self.block(async {
            let mut stream = self.docker.create_image(Some(options), None, None);
            while let Some(item) = stream.next().await {
                let info = item.map_err(exec_err)?;
                if let Some(message) = &info.error {
                    return Err(Error::Executor(message.clone()));
                }
                render_progress(&info, tty);
            }
            Ok(())
        })
    }

    fn use_image(&mut self, reference: &str, config: &ContainerConfig) -> Result<String> {
        let inspect = self.block(async {
            self.docker.inspect_image(reference).await.map_err(exec_err)
        })?;
        let id = inspect.id.unwrap_or_else(|| reference.to_string());
        self.image_id = Some(id.clone());
        self.materialized = Some(config.clone());
        Ok(id)
    }

    fn make_image(&mut self, config: &ContainerConfig) -> Result<String> {
        if let (Some(id), Some(materialized)) = (&self.image_id, &self.materialized) {
            if materialized == config {
                return Ok(id.clone());
            }
        }
        self.commit_inner(config, None, None)
    }

    fn commit(
        &mut self,
        config: &ContainerConfig,
        fingerprint: &Fingerprint,
        hook: Option<CommitHook>,
    ) -> Result<String> {
        self.commit_inner(config, Some(fingerprint), hook)
    }

    fn sync_config(&mut self, config: &ContainerConfig) {
        self.materialized = Some(config.clone());
    }

    fn set_context(&mut self, context: BuildContext) {
        self.context = context;
    }
}

fn exec_err(err: bollard::errors::Error) -> Error {
    Error::Executor(err.to_string())
}

/// One pull progress record per line: carriage-return terminated on a TTY so
/// the line updates in place, newline terminated otherwise.
fn render_progress(info: &CreateImageInfo, tty: bool) {
    let id = info.id.as_deref().unwrap_or_default();
    let status = info.status.as_deref().unwrap_or_default();
    let progress = info.progress.as_deref().unwrap_or_default();
    if tty {
        print!("{} {} {}\r", id, status, progress);
        let _ = std::io::stdout().flush();
    } else {
        println!("{} {} {}", id, status, progress);
    }
}

/// Split `repo[:tag]`, defaulting the tag to `latest`. A colon inside a
/// registry host (`localhost:5000/img`) is not a tag separator.
fn split_reference(name: &str) -> (String, String) {
    if let Some(idx) = name.rfind(':') {
        if name.rfind('/').map_or(true, |slash| idx > slash) {
            return (name[..idx].to_string(), name[idx + 1..].to_string());
        }
    }
    (name.to_string(), "latest".to_string())
}

fn container_config(config: &ContainerConfig, image: Option<&str>) -> Config<String> {
    Config {
        image: image.map(str::to_string),
        entrypoint: some_vec(&config.entrypoint),
        cmd: some_vec(&config.cmd),
        env: some_vec(&config.env),
        user: some_str(&config.user),
        working_dir: some_str(&config.working_dir),
        tty: Some(config.tty),
        attach_stdout: Some(config.attach_stdout),
        attach_stderr: Some(config.attach_stderr),
        ..Default::default()
    }
}

fn some_vec(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

fn some_str(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
