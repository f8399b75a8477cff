//! Detecting and cleaning up after an apply that did not finish.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};
use crate::lock::StagingLock;
use crate::staging::{APPLY_RESULT_FILE, StagingManifest, sweep_temp_dirs};

/// Summary the applier leaves in the staging root when it fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyFailure {
    pub exit_code: i32,
    pub status: String,
    pub error: Option<String>,
    pub copied_count: usize,
    pub finished_at: DateTime<Utc>,
}

impl ApplyFailure {
    /// Write the summary into `staging_root`.
    ///
    /// # Errors
    /// Returns [`UpdateError::Filesystem`] if the file cannot be written.
    pub fn write(&self, staging_root: &Path) -> Result<()> {
        let path = staging_root.join(APPLY_RESULT_FILE);
        let content = serde_json::to_string_pretty(self)
            .map_err(|error| UpdateError::io("failed to serialize apply result", error.into()))?;
        std::fs::write(&path, content)
            .map_err(|error| UpdateError::io_with_path("failed to write apply result", &path, &error))
    }

    fn read(staging_root: &Path) -> Option<Self> {
        let path = staging_root.join(APPLY_RESULT_FILE);
        let content = std::fs::read_to_string(&path).ok()?;
        serde_json::from_str(&content)
            .inspect_err(|error| warn!("Ignoring malformed {}: {error}", path.display()))
            .ok()
    }
}

/// A staging root still on disk at host startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedStaging {
    pub manifest: StagingManifest,
    /// Present when an applier ran and failed; absent when staging finished
    /// but the update was never applied.
    pub failure: Option<ApplyFailure>,
}

/// Look for a staged payload left behind by an earlier run.
///
/// A staging root with an unreadable manifest is not reported; [`discard`]
/// removes it.
#[must_use]
pub fn find_orphaned_staging(staging_dir: &Path) -> Option<OrphanedStaging> {
    if !staging_dir.is_dir() {
        return None;
    }

    let manifest = match StagingManifest::read(staging_dir) {
        Ok(manifest) => manifest,
        Err(error) => {
            warn!(
                "Staging directory {} has no usable manifest: {error}",
                staging_dir.display()
            );
            return None;
        }
    };
    let failure = ApplyFailure::read(staging_dir);
    if let Some(failure) = &failure {
        warn!(
            "Previous update to {} failed with exit code {}: {}",
            manifest.version,
            failure.exit_code,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }
    Some(OrphanedStaging { manifest, failure })
}

/// Remove the staging root and any scratch directories next to it.
///
/// # Errors
/// Returns [`UpdateError::Busy`] while a stage or apply is running, or
/// [`UpdateError::Filesystem`] if the directory cannot be removed.
pub fn discard(staging_dir: &Path) -> Result<()> {
    let _lock = StagingLock::acquire(staging_dir)?;

    if staging_dir.exists() {
        std::fs::remove_dir_all(staging_dir).map_err(|error| {
            UpdateError::io_with_path("failed to remove staging directory", staging_dir, &error)
        })?;
        info!("Discarded staged update at {}", staging_dir.display());
    }
    if let Some(parent) = staging_dir.parent() {
        sweep_temp_dirs(parent);
    }
    Ok(())
}

/// Remove scratch directories from interrupted stage attempts.
///
/// Returns how many were removed. Does nothing while another stage or apply
/// holds the lock.
#[must_use]
pub fn sweep_stale(staging_dir: &Path) -> usize {
    let Some(parent) = staging_dir.parent() else {
        return 0;
    };
    match StagingLock::acquire(staging_dir) {
        Ok(_lock) => sweep_temp_dirs(parent),
        Err(error) => {
            info!("Skipping stale staging sweep: {error}");
            0
        }
    }
}
