//! Test support: an in-memory recording executor.
//!
//! [`RecordingExecutor`] implements the full executor contract against a
//! shared [`Ledger`] instead of a container daemon. Several executors can
//! share one ledger, modeling several builders talking to the same daemon:
//! local images, the build cache, and the pull history are common state,
//! while each executor keeps its own current image.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use luabox_core::{BuildContext, ContainerConfig, Error, Fingerprint, Result};

use crate::executor::{CommitHook, Executor};

/// One committed layer as observed by a recording executor.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub parent: Option<String>,
    pub image: String,
    pub fingerprint: String,
    pub config: ContainerConfig,
    pub hook: Option<CommitHook>,
}

/// Shared state behind one or more recording executors.
#[derive(Debug, Default)]
pub struct Ledger {
    /// References pulled over the network, in order.
    pub pulls: Vec<String>,
    /// Every commit performed, in order.
    pub commits: Vec<CommitRecord>,
    /// Images minted by `make_image` when the configuration was dirty.
    pub finalized: Vec<String>,
    /// `(image id, tag)` pairs.
    pub tags: Vec<(String, String)>,
    /// `(parent image id, fingerprint)` to image id.
    pub cache: HashMap<(String, String), String>,
    images: HashMap<String, String>,
    next_image: u32,
}

impl Ledger {
    pub fn shared() -> Arc<Mutex<Ledger>> {
        Arc::new(Mutex::new(Ledger::default()))
    }

    /// Make `reference` locally resolvable without a pull.
    pub fn seed_image(&mut self, reference: &str) {
        self.images
            .insert(reference.to_string(), Self::image_for(reference));
    }

    /// The id a pulled or seeded reference resolves to. Deterministic so
    /// concurrent builders observe the same id.
    pub fn image_for(reference: &str) -> String {
        format!("img-{}", reference)
    }

    fn mint(&mut self) -> String {
        self.next_image += 1;
        format!("img-{:04}", self.next_image)
    }
}

/// An in-memory executor recording every operation.
pub struct RecordingExecutor {
    ledger: Arc<Mutex<Ledger>>,
    context: BuildContext,
    image_id: Option<String>,
    materialized: Option<ContainerConfig>,
    pull_delay: Duration,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::with_ledger(Ledger::shared())
    }

    pub fn with_ledger(ledger: Arc<Mutex<Ledger>>) -> Self {
        Self {
            ledger,
            context: BuildContext::new(),
            image_id: None,
            materialized: None,
            pull_delay: Duration::ZERO,
        }
    }

    /// Make pulls take `delay`, widening the window in which concurrent
    /// pulls of the same reference can collide.
    pub fn with_pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = delay;
        self
    }

    pub fn ledger(&self) -> Arc<Mutex<Ledger>> {
        Arc::clone(&self.ledger)
    }
}

impl Default for RecordingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for RecordingExecutor {
    fn image_id(&self) -> Option<String> {
        self.image_id.clone()
    }

    fn tag(&mut self, name: &str) -> Result<()> {
        let image = self
            .image_id
            .clone()
            .ok_or_else(|| Error::Executor("no image to tag".to_string()))?;
        self.ledger
            .lock()
            .unwrap()
            .tags
            .push((image, name.to_string()));
        Ok(())
    }

    fn check_cache(
        &mut self,
        fingerprint: &Fingerprint,
        config: &ContainerConfig,
    ) -> Result<bool> {
        let parent = self.image_id.clone().unwrap_or_default();
        let cached = self
            .ledger
            .lock()
            .unwrap()
            .cache
            .get(&(parent, fingerprint.to_string()))
            .cloned();
        match cached {
            Some(image) => {
                self.image_id = Some(image);
                self.materialized = Some(config.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn image_present(&mut self, reference: &str) -> Result<bool> {
        Ok(self.ledger.lock().unwrap().images.contains_key(reference))
    }

    fn pull(&mut self, reference: &str) -> Result<()> {
        self.context.check()?;
        // Sleep outside the ledger lock so concurrent builders keep probing.
        if !self.pull_delay.is_zero() {
            std::thread::sleep(self.pull_delay);
        }
        let mut ledger = self.ledger.lock().unwrap();
        ledger.pulls.push(reference.to_string());
        ledger.seed_image(reference);
        Ok(())
    }

    fn use_image(&mut self, reference: &str, config: &ContainerConfig) -> Result<String> {
        let image = self
            .ledger
            .lock()
            .unwrap()
            .images
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::Executor(format!("image not found: {}", reference)))?;
        self.image_id = Some(image.clone());
        self.materialized = Some(config.clone());
        Ok(image)
    }

    fn make_image(&mut self, config: &ContainerConfig) -> Result<String> {
        if let (Some(image), Some(materialized)) = (&self.image_id, &self.materialized) {
            if materialized == config {
                return Ok(image.clone());
            }
        }
        let image = {
            let mut ledger = self.ledger.lock().unwrap();
            let image = ledger.mint();
            ledger.finalized.push(image.clone());
            image
        };
        self.image_id = Some(image.clone());
        self.materialized = Some(config.clone());
        Ok(image)
    }

    fn commit(
        &mut self,
        config: &ContainerConfig,
        fingerprint: &Fingerprint,
        hook: Option<CommitHook>,
    ) -> Result<String> {
        self.context.check()?;
        let parent = self.image_id.clone();
        let image = {
            let mut ledger = self.ledger.lock().unwrap();
            let image = ledger.mint();
            ledger.commits.push(CommitRecord {
                parent: parent.clone(),
                image: image.clone(),
                fingerprint: fingerprint.to_string(),
                config: config.clone(),
                hook,
            });
            ledger.cache.insert(
                (parent.unwrap_or_default(), fingerprint.to_string()),
                image.clone(),
            );
            image
        };
        self.image_id = Some(image.clone());
        self.materialized = Some(config.clone());
        Ok(image)
    }

    fn sync_config(&mut self, config: &ContainerConfig) {
        self.materialized = Some(config.clone());
    }

    fn set_context(&mut self, context: BuildContext) {
        self.context = context;
    }
}
