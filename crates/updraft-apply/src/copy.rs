use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use updraft_core::{PreservedPathSet, UpdateError};

/// Files to copy and paths to leave alone, decided before anything is
/// written.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CopyPlan {
    /// Install-relative paths of payload files to copy.
    pub files: Vec<PathBuf>,
    /// Install-relative payload paths matching a preserved pattern. A
    /// preserved directory appears once and is not descended into.
    pub skipped: Vec<PathBuf>,
}

/// Walk `payload` and split its entries into files to copy and preserved
/// paths to skip.
///
/// # Errors
/// Returns [`UpdateError::Filesystem`] if the payload cannot be read.
pub fn plan(payload: &Path, preserved: &PreservedPathSet) -> Result<CopyPlan, UpdateError> {
    let mut plan = CopyPlan::default();
    walk(payload, Path::new(""), &mut |relative, is_dir| {
        if preserved.matches(relative) {
            plan.skipped.push(relative.to_path_buf());
            return Visit::Skip;
        }
        if !is_dir {
            plan.files.push(relative.to_path_buf());
        }
        Visit::Continue
    })?;
    plan.files.sort();
    plan.skipped.sort();
    Ok(plan)
}

/// Copy every planned file from `payload` into `install`, stopping at the
/// first failure. Returns the number of files written.
///
/// `copied` counts files already replaced so a caller can report partial
/// progress when this fails.
///
/// # Errors
/// Returns [`UpdateError::Filesystem`] for the first file that cannot be
/// replaced.
pub fn apply(
    plan: &CopyPlan,
    payload: &Path,
    install: &Path,
    copied: &mut usize,
) -> Result<(), UpdateError> {
    for relative in &plan.files {
        let source = payload.join(relative);
        let dest = install.join(relative);
        replace_file(&source, &dest)?;
        *copied += 1;
        debug!("Replaced {}", relative.display());
    }
    info!("Copied {copied} files into {}", install.display());
    Ok(())
}

/// Delete installed files the payload no longer ships, keeping preserved
/// paths and anything under `keep`. Returns the number of files removed.
///
/// # Errors
/// Returns [`UpdateError::Filesystem`] if the install tree cannot be read or
/// a file cannot be removed.
pub fn delete_removed(
    plan: &CopyPlan,
    install: &Path,
    preserved: &PreservedPathSet,
    keep: &[PathBuf],
) -> Result<usize, UpdateError> {
    let shipped: HashSet<&Path> = plan.files.iter().map(PathBuf::as_path).collect();
    let mut stale = Vec::new();
    walk(install, Path::new(""), &mut |relative, is_dir| {
        let absolute = install.join(relative);
        if preserved.matches(relative) || keep.iter().any(|root| absolute.starts_with(root)) {
            return Visit::Skip;
        }
        if !is_dir && !shipped.contains(relative) {
            stale.push(absolute);
        }
        Visit::Continue
    })?;

    for path in &stale {
        std::fs::remove_file(path).map_err(|error| {
            UpdateError::io_with_path("failed to delete removed file", path, &error)
        })?;
        debug!("Deleted {}", path.display());
    }
    if !stale.is_empty() {
        info!("Deleted {} files no longer shipped", stale.len());
    }
    Ok(stale.len())
}

/// Atomically replace `dest` with a copy of `source`.
///
/// The data goes to a sibling temporary file which is synced and renamed over
/// `dest`, so a crash leaves either the old or the new file.
fn replace_file(source: &Path, dest: &Path) -> Result<(), UpdateError> {
    if dest.is_dir() {
        return Err(UpdateError::io_with_path(
            "refusing to replace a directory with a file",
            dest,
            &io::Error::from(io::ErrorKind::IsADirectory),
        ));
    }

    let parent = dest.parent().ok_or_else(|| {
        UpdateError::io_with_path(
            "destination has no parent directory",
            dest,
            &io::Error::from(io::ErrorKind::InvalidInput),
        )
    })?;
    std::fs::create_dir_all(parent).map_err(|error| {
        UpdateError::io_with_path("failed to create install directory", parent, &error)
    })?;

    let mut input = std::fs::File::open(source)
        .map_err(|error| UpdateError::io_with_path("failed to open staged file", source, &error))?;
    let permissions = input
        .metadata()
        .map_err(|error| UpdateError::io_with_path("failed to stat staged file", source, &error))?
        .permissions();

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|error| {
        UpdateError::io_with_path("failed to create temporary file", parent, &error)
    })?;
    io::copy(&mut input, temp.as_file_mut())
        .and_then(|_| temp.as_file().set_permissions(permissions))
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|error| UpdateError::io_with_path("failed to write replacement", dest, &error))?;
    temp.persist(dest).map_err(|error| {
        UpdateError::io_with_path("failed to move replacement into place", dest, &error.error)
    })?;
    Ok(())
}

enum Visit {
    Continue,
    Skip,
}

/// Depth-first walk calling `visit` with each entry's path relative to
/// `root` and whether it is a directory. Symlinks are skipped.
fn walk(
    root: &Path,
    relative: &Path,
    visit: &mut dyn FnMut(&Path, bool) -> Visit,
) -> Result<(), UpdateError> {
    let dir = root.join(relative);
    let entries = std::fs::read_dir(&dir)
        .map_err(|error| UpdateError::io_with_path("failed to read directory", &dir, &error))?;

    for entry in entries {
        let entry =
            entry.map_err(|error| UpdateError::io_with_path("failed to read entry", &dir, &error))?;
        let file_type = entry.file_type().map_err(|error| {
            UpdateError::io_with_path("failed to read entry type", &entry.path(), &error)
        })?;
        if file_type.is_symlink() {
            warn!("Skipping symlink {}", entry.path().display());
            continue;
        }

        let child = relative.join(entry.file_name());
        let is_dir = file_type.is_dir();
        if matches!(visit(&child, is_dir), Visit::Continue) && is_dir {
            walk(root, &child, visit)?;
        }
    }
    Ok(())
}
