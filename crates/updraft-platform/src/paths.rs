use std::path::{Path, PathBuf};
use thiserror::Error;

const APP_DIR_NAME: &str = "updraft";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppPathsError {
    #[error("no home directory for the current user")]
    NoHome,
    #[error("no {0} directory on this platform")]
    NoBaseDir(&'static str),
}

/// Per-user directories the updater reads and writes.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Resolve the updater's directories for the current user.
    ///
    /// # Errors
    /// Returns an error when the platform does not report one of the base
    /// directories.
    pub fn new() -> Result<Self, AppPathsError> {
        #[cfg(target_os = "macos")]
        {
            let support = dirs::home_dir()
                .ok_or(AppPathsError::NoHome)?
                .join("Library");
            Ok(Self::under(
                &support.join("Application Support"),
                &support.join("Caches"),
                &support.join("Application Support"),
            ))
        }

        #[cfg(not(target_os = "macos"))]
        {
            let base = |dir: Option<PathBuf>, kind| dir.ok_or(AppPathsError::NoBaseDir(kind));
            Ok(Self::under(
                &base(dirs::config_dir(), "config")?,
                &base(dirs::cache_dir(), "cache")?,
                &base(dirs::data_dir(), "data")?,
            ))
        }
    }

    fn under(config: &Path, cache: &Path, data: &Path) -> Self {
        Self {
            config_dir: config.join(APP_DIR_NAME),
            cache_dir: cache.join(APP_DIR_NAME),
            data_dir: data.join(APP_DIR_NAME),
        }
    }

    #[must_use]
    pub fn update_state_file(&self) -> PathBuf {
        self.config_dir.join("update.json")
    }

    /// Parent of the staging directory; also holds the staging lock file and
    /// scratch directories of in-progress downloads.
    #[must_use]
    pub fn updates_dir(&self) -> PathBuf {
        self.cache_dir.join("updates")
    }

    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.updates_dir().join("staging")
    }

    #[must_use]
    pub fn apply_log_file(&self) -> PathBuf {
        self.data_dir.join("apply.log")
    }

    /// Create the config, data and updates directories.
    ///
    /// # Errors
    /// Returns the first directory creation failure.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        [&self.config_dir, &self.data_dir, &self.updates_dir()]
            .into_iter()
            .try_for_each(std::fs::create_dir_all)
    }
}
