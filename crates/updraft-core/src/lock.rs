use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::debug;

use crate::error::{Result, UpdateError};

/// Lock file guarding `staging_dir`, shared by the stager and the applier.
#[must_use]
pub fn lock_path(staging_dir: &Path) -> PathBuf {
    staging_dir.with_extension("lock")
}

/// Advisory exclusive lock held for the duration of a stage or apply.
///
/// Released when dropped. The lock file itself is left behind.
#[derive(Debug)]
pub struct StagingLock {
    _file: File,
    path: PathBuf,
}

impl StagingLock {
    /// Try to take the lock without blocking.
    ///
    /// # Errors
    /// Returns [`UpdateError::Busy`] if another process or task holds it, or
    /// [`UpdateError::Filesystem`] if the lock file cannot be opened.
    pub fn acquire(staging_dir: &Path) -> Result<Self> {
        let path = lock_path(staging_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                UpdateError::io_with_path("failed to create updates directory", parent, &error)
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|error| {
                UpdateError::io_with_path("failed to open staging lock file", &path, &error)
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(error) if error.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                return Err(UpdateError::Busy(path.display().to_string()));
            }
            Err(error) => {
                return Err(UpdateError::io("failed to acquire staging lock", error));
            }
        }

        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)).map(|_| ()))
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .map_err(|error| UpdateError::io("failed to write staging lock metadata", error))?;

        debug!("Acquired staging lock {}", path.display());
        Ok(Self { _file: file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::{StagingLock, lock_path};
    use crate::error::UpdateError;

    #[test]
    fn lock_file_sits_beside_staging_dir() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let staging = temp.path().join("staging");

        assert_eq!(lock_path(&staging), temp.path().join("staging.lock"));
    }

    #[test]
    fn second_acquire_is_busy_until_release() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let staging = temp.path().join("staging");

        let first = StagingLock::acquire(&staging).expect("first acquire should succeed");
        assert!(matches!(
            StagingLock::acquire(&staging),
            Err(UpdateError::Busy(_))
        ));

        drop(first);
        StagingLock::acquire(&staging).expect("acquire after release should succeed");
    }
}
