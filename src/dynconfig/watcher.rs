//! Training-process-side config polling
//!
//! The training loop calls into this on its own cadence (every handful of
//! steps). The watcher stats the file and only re-reads on an mtime change;
//! an absent, empty, or corrupt file falls back to the last good state or
//! defaults with a warning. Nothing here can fail a training step.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use super::DynamicConfig;
use crate::constants::dynconfig::FILE_NAME;

/// Cached, mtime-gated view of one job's dynamic config file
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
    cache: DynamicConfig,
}

impl ConfigWatcher {
    /// Watch the config file for `job_name` under the training root
    pub fn new(root: impl AsRef<Path>, job_name: &str) -> Self {
        Self {
            path: root.as_ref().join(job_name).join(FILE_NAME),
            last_modified: None,
            cache: DynamicConfig::default(),
        }
    }

    /// The current config: cached unless the file changed since last check.
    ///
    /// Every failure mode (missing file, unreadable file, stat error) serves
    /// the cache; the training loop never sees an error.
    pub fn current(&mut self) -> &DynamicConfig {
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => {
                // Absent file: defaults, and re-arm so a future file reloads
                self.last_modified = None;
                self.cache = DynamicConfig::default();
                return &self.cache;
            }
        };

        if self.last_modified == Some(modified) {
            return &self.cache;
        }
        self.last_modified = Some(modified);

        match std::fs::read_to_string(&self.path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => {
                    debug!("Dynamic config reloaded from {}", self.path.display());
                    self.cache = config;
                }
                Err(e) => {
                    warn!(
                        "Dynamic config at {} failed to parse, keeping previous values: {}",
                        self.path.display(),
                        e
                    );
                }
            },
            Err(e) => {
                warn!(
                    "Dynamic config at {} unreadable, keeping previous values: {}",
                    self.path.display(),
                    e
                );
            }
        }

        &self.cache
    }

    /// Sampling cadence, or `default` when the override is absent
    pub fn sample_every(&mut self, default: u32) -> u32 {
        let value = self.current().sample_every;
        if value > 0 { value } else { default }
    }

    /// Save cadence; unset defers to the process's static configuration
    pub fn save_every(&mut self, default: Option<u32>) -> Option<u32> {
        self.current().save_every.or(default)
    }

    /// Log cadence; unset defers to the process's static configuration
    pub fn log_every(&mut self, default: Option<u32>) -> Option<u32> {
        self.current().log_every.or(default)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
