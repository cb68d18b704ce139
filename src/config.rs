//! Store configuration.
//!
//! Backend selection, data directory resolution, and lock tuning. The
//! backend is picked once at startup and handed to
//! [`crate::storage::open_store`]; nothing downstream branches on it
//! again.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which storage backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    FlatFile,
    Sqlite,
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::FlatFile
    }
}

/// Tuning for directory-lock acquisition.
///
/// Acquisition retries with exponentially increasing, jittered delays
/// (capped at `max_delay`) until `timeout` has elapsed in total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Total time budget for one acquisition attempt.
    pub timeout: Duration,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for the backoff.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            initial_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

/// Full store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub lock: LockConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            data_dir: default_data_dir(),
            lock: LockConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Config rooted at an explicit data directory.
    #[must_use]
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Same config with a different backend.
    #[must_use]
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }
}

/// Platform data directory for docket, falling back to a local `.docket`
/// directory when the platform offers none.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "greenfieldlabs", "docket")
        .map_or_else(|| Path::new(".docket").to_path_buf(), |dirs| {
            dirs.data_dir().to_path_buf()
        })
}
