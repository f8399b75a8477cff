use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};
use crate::version::Channel;

/// Persisted update section of the host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateState {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub channel: Channel,

    /// Exact asset name to download instead of the platform default.
    #[serde(default)]
    pub asset_name: Option<String>,

    #[serde(default = "default_check_interval")]
    pub check_interval_hours: u64,

    #[serde(default)]
    pub last_check: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

fn default_check_interval() -> u64 {
    24
}

impl Default for UpdateState {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: Channel::Stable,
            asset_name: None,
            check_interval_hours: default_check_interval(),
            last_check: None,
        }
    }
}

impl UpdateState {
    /// Load the state file, falling back to defaults when it is missing or
    /// unreadable.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|error| {
                warn!("Ignoring malformed update state {}: {error}", path.display());
                Self::default()
            }),
            Err(error) => {
                warn!("Failed to read update state {}: {error}", path.display());
                Self::default()
            }
        }
    }

    /// Write the state next to `path` and rename it into place.
    ///
    /// # Errors
    /// Returns [`UpdateError::Filesystem`] when the directory cannot be created
    /// or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent).map_err(|error| {
            UpdateError::io_with_path("failed to create config directory", parent, &error)
        })?;

        let content = serde_json::to_string_pretty(self)
            .map_err(|error| UpdateError::io("failed to serialize update state", error.into()))?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|error| UpdateError::io("failed to create update state file", error))?;
        temp.write_all(content.as_bytes())
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|error| UpdateError::io("failed to write update state", error))?;
        temp.persist(path)
            .map_err(|error| UpdateError::io_with_path("failed to replace update state", path, &error.error))?;
        Ok(())
    }

    /// When the next periodic check becomes due, if a check ever succeeded.
    #[must_use]
    pub fn next_check_at(&self) -> Option<DateTime<Utc>> {
        let hours = i64::try_from(self.check_interval_hours).unwrap_or(i64::MAX);
        let interval = Duration::try_hours(hours).unwrap_or(Duration::MAX);
        self.last_check.map(|last| {
            last.checked_add_signed(interval)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    /// Whether the periodic interval has elapsed since the last successful
    /// check. A state that has never been checked is always due.
    #[must_use]
    pub fn is_check_due(&self, now: DateTime<Utc>) -> bool {
        self.next_check_at().is_none_or(|next| now >= next)
    }

    pub fn mark_checked(&mut self, now: DateTime<Utc>) {
        self.last_check = Some(now);
    }
}
