//! Dynamic per-job configuration
//!
//! A small TOML file in each job's output directory lets the UI retune a
//! running training process without restarting it. The file is the only
//! agreement point between writer (UI) and reader (training process): writes
//! are validate, then read-merge-write inside a per-job critical section,
//! persisted by atomic rename so a concurrent reader never sees a
//! half-written file.

pub mod watcher;

pub use watcher::ConfigWatcher;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::constants::dynconfig::{DEFAULT_SAMPLE_EVERY, FILE_NAME};
use crate::error::{Result, TrainwatchError};

/// Override values the training process polls for.
///
/// `save_every`/`log_every` absent means "defer to the process's own static
/// configuration"; `sample_every` always carries a value. `last_updated` is
/// set by the writer and only ever displayed, never used for control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(default = "default_sample_every")]
    pub sample_every: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_every: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_every: Option<u32>,
    /// Epoch seconds of the last merge-write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<f64>,
}

fn default_sample_every() -> u32 {
    DEFAULT_SAMPLE_EVERY
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self {
            sample_every: DEFAULT_SAMPLE_EVERY,
            save_every: None,
            log_every: None,
            last_updated: None,
        }
    }
}

/// One field of a merge-write request.
///
/// Deserialization is deliberately lenient: integers, numeric strings, the
/// explicit unset spellings, and JSON null all parse. Rejection happens in
/// [`ConfigPatch::validate`] so the caller gets a field-named error instead
/// of an opaque decode failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FieldPatch {
    /// Field absent from the request: keep the prior value
    #[default]
    Keep,
    /// Explicit unset: defer to the process's static configuration
    Unset,
    /// A candidate value, not yet validated
    Candidate(i64),
    /// Something unparseable; rejected during validation
    Invalid(String),
}

impl FieldPatch {
    #[must_use]
    pub const fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }

    /// Validate into merge form: `None` = keep, `Some(None)` = unset,
    /// `Some(Some(v))` = set.
    fn validate(
        &self,
        field: &'static str,
        allow_unset: bool,
    ) -> Result<Option<Option<u32>>> {
        match self {
            Self::Keep => Ok(None),
            Self::Unset if allow_unset => Ok(Some(None)),
            Self::Unset => Err(TrainwatchError::validation(
                field,
                "must be a positive integer",
            )),
            Self::Candidate(n) if *n > 0 && *n <= i64::from(u32::MAX) => {
                Ok(Some(Some(*n as u32)))
            }
            Self::Candidate(n) => Err(TrainwatchError::validation(
                field,
                format!("must be a positive integer, got {n}"),
            )),
            Self::Invalid(raw) => Err(TrainwatchError::validation(
                field,
                format!("must be a positive integer or \"unset\", got '{raw}'"),
            )),
        }
    }
}

impl<'de> Deserialize<'de> for FieldPatch {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            // JSON writers frequently send whole numbers as floats
            Float(f64),
            Text(String),
        }

        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => Self::Unset,
            Some(Raw::Int(n)) => Self::Candidate(n),
            Some(Raw::Float(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Self::Candidate(f as i64)
            }
            Some(Raw::Float(f)) => Self::Invalid(f.to_string()),
            Some(Raw::Text(s)) => match s.trim() {
                "" | "unset" | "none" | "null" => Self::Unset,
                trimmed => match trimmed.parse::<i64>() {
                    Ok(n) => Self::Candidate(n),
                    Err(_) => Self::Invalid(s),
                },
            },
        })
    }
}

/// Partial update for one job's dynamic config
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPatch {
    #[serde(default)]
    pub sample_every: FieldPatch,
    #[serde(default)]
    pub save_every: FieldPatch,
    #[serde(default)]
    pub log_every: FieldPatch,
}

/// Validated merge plan produced from a patch
#[derive(Debug, Clone, Default, PartialEq)]
struct ValidatedPatch {
    sample_every: Option<u32>,
    save_every: Option<Option<u32>>,
    log_every: Option<Option<u32>>,
}

impl ConfigPatch {
    /// Per-field validation; runs before any disk I/O
    fn validate(&self) -> Result<ValidatedPatch> {
        Ok(ValidatedPatch {
            sample_every: self
                .sample_every
                .validate("sample_every", false)?
                .map(|v| v.expect("unset rejected for sample_every")),
            save_every: self.save_every.validate("save_every", true)?,
            log_every: self.log_every.validate("log_every", true)?,
        })
    }

    /// True when the patch touches nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sample_every.is_keep() && self.save_every.is_keep() && self.log_every.is_keep()
    }
}

/// How the backing file looked at read time.
///
/// Missing and unreadable are both served as defaults, but they are distinct
/// states: a corrupt file is an operational signal, not "no config yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigFileState {
    Present,
    Missing,
    Unreadable,
}

/// Result of reading one job's config
#[derive(Debug, Clone)]
pub struct ConfigReadResult {
    pub config: DynamicConfig,
    pub state: ConfigFileState,
    pub path: PathBuf,
}

/// Reader/writer for per-job dynamic config files under a training root
#[derive(Debug)]
pub struct DynConfigStore {
    root: PathBuf,
    // Serializes the read-merge-write window per job; writers for different
    // jobs never contend
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DynConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_locks: DashMap::new(),
        }
    }

    /// The config file path for a job
    #[must_use]
    pub fn path_for(&self, job_name: &str) -> PathBuf {
        self.root.join(job_name).join(FILE_NAME)
    }

    fn validate_job_name(job_name: &str) -> Result<()> {
        if job_name.trim().is_empty() {
            return Err(TrainwatchError::validation("job_name", "must not be empty"));
        }
        // The job names a directory under the training root
        if job_name.contains(['/', '\\']) || job_name == "." || job_name == ".." {
            return Err(TrainwatchError::validation(
                "job_name",
                "must not contain path separators",
            ));
        }
        Ok(())
    }

    /// Read a job's config.
    ///
    /// An absent file is a first-class state: defaults, not an error. A file
    /// that exists but does not parse is served as defaults too, flagged
    /// `Unreadable` so the degradation is observable.
    pub fn read(&self, job_name: &str) -> Result<ConfigReadResult> {
        Self::validate_job_name(job_name)?;
        let path = self.path_for(job_name);

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ConfigReadResult {
                    config: DynamicConfig::default(),
                    state: ConfigFileState::Missing,
                    path,
                });
            }
            Err(e) => {
                return Err(TrainwatchError::ConfigIo {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };

        match toml::from_str(&raw) {
            Ok(config) => Ok(ConfigReadResult {
                config,
                state: ConfigFileState::Present,
                path,
            }),
            Err(e) => {
                warn!("Config file {} is unreadable: {}", path.display(), e);
                Ok(ConfigReadResult {
                    config: DynamicConfig::default(),
                    state: ConfigFileState::Unreadable,
                    path,
                })
            }
        }
    }

    /// Merge-write a job's config and return the merged result.
    ///
    /// The merge base is the current on-disk state, loaded inside the
    /// per-job lock, so two writers with disjoint edits converge instead of
    /// clobbering each other. A corrupt existing file is logged and treated
    /// as no usable prior state; the write still succeeds.
    pub async fn write(&self, job_name: &str, patch: &ConfigPatch) -> Result<DynamicConfig> {
        Self::validate_job_name(job_name)?;
        let validated = patch.validate()?;

        let lock = self
            .write_locks
            .entry(job_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Base must come from disk now, not from any earlier in-memory copy
        let base = self.read(job_name)?;
        let mut merged = base.config;

        if let Some(value) = validated.sample_every {
            merged.sample_every = value;
        }
        if let Some(value) = validated.save_every {
            merged.save_every = value;
        }
        if let Some(value) = validated.log_every {
            merged.log_every = value;
        }
        merged.last_updated = Some(Utc::now().timestamp_millis() as f64 / 1000.0);

        self.persist(job_name, &merged)?;
        info!(
            job = job_name,
            sample_every = merged.sample_every,
            "Dynamic config updated"
        );
        Ok(merged)
    }

    /// Serialize and atomically replace the job's config file
    fn persist(&self, job_name: &str, config: &DynamicConfig) -> Result<()> {
        let path = self.path_for(job_name);
        let dir = path.parent().expect("config path always has a parent");
        let io_err = |e: std::io::Error| TrainwatchError::ConfigIo {
            path: path.display().to_string(),
            source: e,
        };

        std::fs::create_dir_all(dir).map_err(io_err)?;

        let rendered = toml::to_string_pretty(config)?;
        // Temp file in the same directory so the rename cannot cross devices
        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        std::fs::write(tmp.path(), rendered).map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    /// Jobs under the training root, with whether each has a config file
    pub fn list_jobs(&self) -> Result<Vec<(String, bool)>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(TrainwatchError::ConfigIo {
                    path: self.root.display().to_string(),
                    source: e,
                });
            }
        };

        let mut jobs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TrainwatchError::ConfigIo {
                path: self.root.display().to_string(),
                source: e,
            })?;
            if entry.path().is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                let has_config = entry.path().join(FILE_NAME).is_file();
                jobs.push((name.to_string(), has_config));
            }
        }
        jobs.sort();
        Ok(jobs)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn patch_json(json: &str) -> ConfigPatch {
        serde_json::from_str(json).expect("patch json")
    }

    fn store() -> (TempDir, DynConfigStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = DynConfigStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let (_dir, store) = store();
        let result = store.read("job_a").expect("read");

        assert_eq!(result.state, ConfigFileState::Missing);
        assert_eq!(result.config.sample_every, 100);
        assert_eq!(result.config.save_every, None);
        assert_eq!(result.config.log_every, None);
        assert_eq!(result.config.last_updated, None);
    }

    #[tokio::test]
    async fn test_write_creates_directory_and_file() {
        let (_dir, store) = store();
        let merged = store
            .write("job_a", &patch_json(r#"{"sample_every": 50}"#))
            .await
            .expect("write");

        assert_eq!(merged.sample_every, 50);
        assert!(merged.last_updated.is_some());
        assert!(store.path_for("job_a").is_file());

        let read_back = store.read("job_a").expect("read");
        assert_eq!(read_back.state, ConfigFileState::Present);
        assert_eq!(read_back.config.sample_every, 50);
    }

    #[tokio::test]
    async fn test_disjoint_writes_converge() {
        let (_dir, store) = store();
        store
            .write("job_a", &patch_json(r#"{"sample_every": 50}"#))
            .await
            .expect("first write");
        store
            .write("job_a", &patch_json(r#"{"save_every": 200}"#))
            .await
            .expect("second write");

        let result = store.read("job_a").expect("read");
        assert_eq!(result.config.sample_every, 50);
        assert_eq!(result.config.save_every, Some(200));
    }

    #[tokio::test]
    async fn test_write_idempotent_aside_from_timestamp() {
        let (_dir, store) = store();
        let patch = patch_json(r#"{"sample_every": 50}"#);
        let first = store.write("job_a", &patch).await.expect("write");
        let second = store.write("job_a", &patch).await.expect("write");

        assert_eq!(first.sample_every, second.sample_every);
        assert_eq!(first.save_every, second.save_every);
        assert_eq!(first.log_every, second.log_every);
    }

    #[tokio::test]
    async fn test_explicit_unset_clears_field() {
        let (_dir, store) = store();
        store
            .write("job_a", &patch_json(r#"{"save_every": 200}"#))
            .await
            .expect("set");
        let merged = store
            .write("job_a", &patch_json(r#"{"save_every": "unset"}"#))
            .await
            .expect("unset");

        assert_eq!(merged.save_every, None);
        // Unset keys are absent from the file, not serialized as a sentinel
        let raw = std::fs::read_to_string(store.path_for("job_a")).expect("raw");
        assert!(!raw.contains("save_every"));
    }

    #[tokio::test]
    async fn test_null_means_unset() {
        let (_dir, store) = store();
        store
            .write("job_a", &patch_json(r#"{"log_every": 25}"#))
            .await
            .expect("set");
        let merged = store
            .write("job_a", &patch_json(r#"{"log_every": null}"#))
            .await
            .expect("unset");
        assert_eq!(merged.log_every, None);
    }

    #[tokio::test]
    async fn test_validation_rejects_before_disk() {
        let (_dir, store) = store();
        let err = store
            .write("job_a", &patch_json(r#"{"sample_every": -5}"#))
            .await
            .expect_err("must reject");
        assert!(matches!(
            err,
            TrainwatchError::Validation { field: "sample_every", .. }
        ));
        // Nothing was written
        assert!(!store.path_for("job_a").exists());
    }

    #[tokio::test]
    async fn test_sample_every_rejects_unset() {
        let (_dir, store) = store();
        let err = store
            .write("job_a", &patch_json(r#"{"sample_every": "unset"}"#))
            .await
            .expect_err("must reject");
        assert!(matches!(
            err,
            TrainwatchError::Validation { field: "sample_every", .. }
        ));
    }

    #[tokio::test]
    async fn test_garbage_value_named_in_error() {
        let (_dir, store) = store();
        let err = store
            .write("job_a", &patch_json(r#"{"save_every": "often"}"#))
            .await
            .expect_err("must reject");
        match err {
            TrainwatchError::Validation { field, message } => {
                assert_eq!(field, "save_every");
                assert!(message.contains("often"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_corrupt_file_is_unreadable_then_recovered_by_write() {
        let (_dir, store) = store();
        let path = store.path_for("job_a");
        std::fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        std::fs::write(&path, "sample_every = [not toml").expect("corrupt");

        let read = store.read("job_a").expect("read");
        assert_eq!(read.state, ConfigFileState::Unreadable);
        assert_eq!(read.config, DynamicConfig::default());

        // The write proceeds from the empty base instead of failing
        let merged = store
            .write("job_a", &patch_json(r#"{"sample_every": 50}"#))
            .await
            .expect("write over corruption");
        assert_eq!(merged.sample_every, 50);
        assert_eq!(store.read("job_a").expect("read").state, ConfigFileState::Present);
    }

    #[tokio::test]
    async fn test_concurrent_disjoint_writers_both_land() {
        let (_dir, store) = store();
        let store = Arc::new(store);

        let a = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .write("job_a", &patch_json(r#"{"sample_every": 50}"#))
                    .await
            })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .write("job_a", &patch_json(r#"{"save_every": 200}"#))
                    .await
            })
        };
        a.await.expect("join").expect("write a");
        b.await.expect("join").expect("write b");

        let result = store.read("job_a").expect("read");
        assert_eq!(result.config.sample_every, 50);
        assert_eq!(result.config.save_every, Some(200));
    }

    #[test]
    fn test_invalid_job_names_rejected() {
        let (_dir, store) = store();
        assert!(store.read("").is_err());
        assert!(store.read("../escape").is_err());
        assert!(store.read("a/b").is_err());
    }

    #[test]
    fn test_list_jobs() {
        let (dir, store) = store();
        std::fs::create_dir_all(dir.path().join("job_a")).expect("mkdir");
        std::fs::create_dir_all(dir.path().join("job_b")).expect("mkdir");
        std::fs::write(
            dir.path().join("job_b").join(FILE_NAME),
            "sample_every = 10\n",
        )
        .expect("config");

        let jobs = store.list_jobs().expect("list");
        assert_eq!(
            jobs,
            vec![("job_a".to_string(), false), ("job_b".to_string(), true)]
        );
    }

    #[test]
    fn test_list_jobs_missing_root_is_empty() {
        let store = DynConfigStore::new("/nonexistent/trainwatch-test-root");
        assert!(store.list_jobs().expect("list").is_empty());
    }

    #[test]
    fn test_patch_absent_fields_keep() {
        let patch = patch_json(r#"{}"#);
        assert!(patch.is_empty());
        let validated = patch.validate().expect("validate");
        assert_eq!(validated, ValidatedPatch::default());
    }
}
