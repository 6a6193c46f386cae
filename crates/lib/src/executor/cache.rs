//! The persisted build-cache index.
//!
//! Maps `(parent image id, step fingerprint)` to the image a previous run of
//! the same step produced. The step fingerprint alone would alias identical
//! steps across divergent histories, so the parent id is part of the key.
//! The index is a flat JSON file shared by every builder on the machine; it
//! survives across builder instances.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use luabox_core::{Fingerprint, Result};

/// Environment variable overriding the index location.
const CACHE_ENV: &str = "LUABOX_CACHE";

/// Index file location relative to the home directory.
const CACHE_FILE: &str = ".luabox/cache.json";

/// Fingerprint-to-image index, write-through persisted.
#[derive(Debug)]
pub struct CacheIndex {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl CacheIndex {
    /// Open the index at `path`, starting empty when the file is missing or
    /// unreadable (a corrupt cache never fails a build).
    pub fn open(path: PathBuf) -> Self {
        let entries = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self { path, entries }
    }

    /// The default index location: `$LUABOX_CACHE`, else `~/.luabox/cache.json`.
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CACHE_ENV) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
        home.join(CACHE_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up the image a step produced under `parent`.
    pub fn lookup(&self, parent: &str, fingerprint: &Fingerprint) -> Option<&str> {
        self.entries
            .get(&Self::key(parent, fingerprint))
            .map(String::as_str)
    }

    /// Record a step result and persist the index.
    pub fn record(&mut self, parent: &str, fingerprint: &Fingerprint, image: &str) -> Result<()> {
        self.entries
            .insert(Self::key(parent, fingerprint), image.to_string());
        self.save()
    }

    /// Drop a stale entry (e.g. the cached image no longer exists) and
    /// persist the index.
    pub fn forget(&mut self, parent: &str, fingerprint: &Fingerprint) -> Result<()> {
        if self.entries.remove(&Self::key(parent, fingerprint)).is_some() {
            debug!(parent, fingerprint = %fingerprint, "dropped stale cache entry");
            self.save()?;
        }
        Ok(())
    }

    // Image ids and base64 fingerprints never contain '@', so the composite
    // key is unambiguous.
    fn key(parent: &str, fingerprint: &Fingerprint) -> String {
        format!("{}@{}", parent, fingerprint)
    }

    fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(&self.entries)?)?;
        Ok(())
    }
}
