use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, UpdateError};
use crate::feed::{ReleaseAsset, ReleaseInfo, is_supported_archive};
use crate::lock::StagingLock;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const PAYLOAD_DIR: &str = "payload";
pub const APPLY_RESULT_FILE: &str = "apply-result.json";

/// Prefix of scratch directories created beside the staging root.
pub(crate) const TEMP_PREFIX: &str = ".stage-";

const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);
const MACOS_METADATA_DIR: &str = "__MACOSX";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateProgress {
    Downloading { downloaded: u64, total: u64 },
    Verifying,
    Extracting { extracted: u64, total: u64 },
    Staged,
}

/// Description of an extracted payload, stored as `manifest.json` in the
/// staging root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingManifest {
    pub staging_root: PathBuf,
    pub source_release_id: String,
    pub version: String,
    pub asset_name: String,
    pub payload_dir: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl StagingManifest {
    /// Read the manifest from `staging_root`.
    ///
    /// # Errors
    /// Returns [`UpdateError::Filesystem`] if the file is unreadable and
    /// [`UpdateError::Parse`] if it is not a valid manifest.
    pub fn read(staging_root: &Path) -> Result<Self> {
        let path = staging_root.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&path).map_err(|error| {
            UpdateError::io_with_path("failed to read staging manifest", &path, &error)
        })?;
        serde_json::from_str(&content)
            .map_err(|error| UpdateError::parse("staging manifest", error))
    }

    fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let content = serde_json::to_string_pretty(self)
            .map_err(|error| UpdateError::io("failed to serialize staging manifest", error.into()))?;
        std::fs::write(&path, content).map_err(|error| {
            UpdateError::io_with_path("failed to write staging manifest", &path, &error)
        })
    }
}

/// Rate limiter for download progress events.
///
/// Lets an event through when [`PROGRESS_INTERVAL`] has elapsed since the
/// last one or the whole percentage changed.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    last_percent: Option<u64>,
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(PROGRESS_INTERVAL)
    }
}

impl ProgressThrottle {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            last_percent: None,
        }
    }

    pub fn should_emit(&mut self, done: u64, total: u64, now: Instant) -> bool {
        let percent = (total > 0).then(|| done.saturating_mul(100) / total);
        let elapsed = self
            .last_emit
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        let percent_changed = percent.is_some() && percent != self.last_percent;

        if elapsed || percent_changed {
            self.last_emit = Some(now);
            self.last_percent = percent;
            true
        } else {
            false
        }
    }
}

/// Downloads, verifies and extracts release payloads into a staging root.
#[derive(Debug, Clone)]
pub struct Stager {
    client: reqwest::Client,
    staging_dir: PathBuf,
}

impl Stager {
    #[must_use]
    pub fn new(client: reqwest::Client, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            staging_dir: staging_dir.into(),
        }
    }

    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Rebuild the staging root from `asset` of `release`.
    ///
    /// The previous staging root, if any, is replaced only once the new tree
    /// is complete. Any failure or cancellation leaves no scratch files.
    ///
    /// # Errors
    /// [`UpdateError::Busy`] if another stage or apply holds the lock,
    /// [`UpdateError::Download`] for transfer, size and checksum failures,
    /// [`UpdateError::Extract`] for unusable archives,
    /// [`UpdateError::Filesystem`] for local I/O failures and
    /// [`UpdateError::Cancelled`] when `cancel` fires first.
    pub async fn prepare_staging(
        &self,
        release: &ReleaseInfo,
        asset: &ReleaseAsset,
        progress: &mpsc::Sender<UpdateProgress>,
        cancel: &CancellationToken,
    ) -> Result<StagingManifest> {
        if !is_supported_archive(&asset.name) {
            return Err(UpdateError::extract(
                "unsupported archive format",
                &asset.name,
            ));
        }

        let _lock = StagingLock::acquire(&self.staging_dir)?;
        let parent = self.updates_dir()?;
        sweep_temp_dirs(parent);

        let temp_dir = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(parent)
            .map_err(|error| UpdateError::io("failed to create staging temp directory", error))?;

        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        let archive_path = temp_dir.path().join(archive_file_name(&asset.name));
        info!("Downloading {} for release {}", asset.name, release.tag);
        let digest = download_asset(&self.client, asset, &archive_path, progress, cancel).await?;

        let _ = progress.send(UpdateProgress::Verifying).await;
        verify_digest(asset, &digest)?;

        let payload_dir = temp_dir.path().join(PAYLOAD_DIR);
        let extract_cancel = cancel.clone();
        let extract_progress = progress.clone();
        let archive = archive_path.clone();
        let payload = payload_dir.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            let mut throttle = ProgressThrottle::default();
            let mut report = |extracted: u64, total: u64| {
                if extracted == total || throttle.should_emit(extracted, total, Instant::now()) {
                    let _ = extract_progress
                        .blocking_send(UpdateProgress::Extracting { extracted, total });
                }
            };
            extract_zip(&archive, &payload, &extract_cancel, &mut report)?;
            collapse_single_root(&payload)
        })
        .await
        .map_err(|error| UpdateError::extract("extraction worker failed", error))?;
        extracted?;

        std::fs::remove_file(&archive_path).map_err(|error| {
            UpdateError::io_with_path("failed to remove downloaded archive", &archive_path, &error)
        })?;

        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        let manifest = StagingManifest {
            staging_root: self.staging_dir.clone(),
            source_release_id: release.tag.clone(),
            version: release.version.clone(),
            asset_name: asset.name.clone(),
            payload_dir: self.staging_dir.join(PAYLOAD_DIR),
            created_at: Utc::now(),
        };
        manifest.write(temp_dir.path())?;

        if self.staging_dir.exists() {
            std::fs::remove_dir_all(&self.staging_dir).map_err(|error| {
                UpdateError::io_with_path(
                    "failed to remove previous staging directory",
                    &self.staging_dir,
                    &error,
                )
            })?;
        }
        std::fs::rename(temp_dir.path(), &self.staging_dir).map_err(|error| {
            UpdateError::io_with_path("failed to move staging into place", &self.staging_dir, &error)
        })?;
        let _ = temp_dir.keep();

        let _ = progress.send(UpdateProgress::Staged).await;
        info!(
            "Staged {} {} at {}",
            asset.name,
            release.version,
            self.staging_dir.display()
        );
        Ok(manifest)
    }

    fn updates_dir(&self) -> Result<&Path> {
        let parent = self
            .staging_dir
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .ok_or_else(|| {
                UpdateError::InvalidArgument(format!(
                    "staging directory {} has no parent",
                    self.staging_dir.display()
                ))
            })?;
        std::fs::create_dir_all(parent).map_err(|error| {
            UpdateError::io_with_path("failed to create updates directory", parent, &error)
        })?;
        Ok(parent)
    }
}

/// Remove scratch directories left behind by interrupted stage attempts.
pub(crate) fn sweep_temp_dirs(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() && entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
            debug!("Removing stale staging temp dir {}", path.display());
            match std::fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(error) => warn!("Failed to remove {}: {error}", path.display()),
            }
        }
    }
    removed
}

fn archive_file_name(asset_name: &str) -> &str {
    Path::new(asset_name)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty() && !name.contains(".."))
        .unwrap_or("update.zip")
}

async fn download_asset(
    client: &reqwest::Client,
    asset: &ReleaseAsset,
    dest: &Path,
    progress: &mpsc::Sender<UpdateProgress>,
    cancel: &CancellationToken,
) -> Result<String> {
    let sent = tokio::select! {
        () = cancel.cancelled() => return Err(UpdateError::Cancelled),
        sent = client.get(&asset.url).send() => sent,
    };
    let response = sent.map_err(|error| {
        UpdateError::Download(format!("request for {} failed: {error}", asset.name))
    })?;

    if !response.status().is_success() {
        return Err(UpdateError::Download(format!(
            "{} returned HTTP {}",
            asset.name,
            response.status()
        )));
    }

    let content_length = response.content_length();
    if let Some(length) = content_length
        && asset.size > 0
        && length != asset.size
    {
        return Err(UpdateError::Download(format!(
            "{} is {length} bytes on the server but the release declares {}",
            asset.name, asset.size
        )));
    }
    let total = content_length.unwrap_or(asset.size);

    let mut file = tokio::fs::File::create(dest).await.map_err(|error| {
        UpdateError::io_with_path("failed to create download file", dest, &error)
    })?;
    let mut hasher = Sha256::new();
    let mut throttle = ProgressThrottle::default();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Err(UpdateError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk
            .map_err(|error| UpdateError::Download(format!("stream for {} broke: {error}", asset.name)))?;
        file.write_all(&chunk).await.map_err(|error| {
            UpdateError::io_with_path("failed to write download data", dest, &error)
        })?;
        hasher.update(&chunk);
        downloaded += chunk.len() as u64;

        if throttle.should_emit(downloaded, total, Instant::now()) {
            let _ = progress
                .send(UpdateProgress::Downloading { downloaded, total })
                .await;
        }
    }

    file.flush().await.map_err(|error| {
        UpdateError::io_with_path("failed to flush download file", dest, &error)
    })?;
    file.sync_all().await.map_err(|error| {
        UpdateError::io_with_path("failed to sync download file", dest, &error)
    })?;

    let _ = progress
        .send(UpdateProgress::Downloading { downloaded, total })
        .await;

    let expected = content_length.or((asset.size > 0).then_some(asset.size));
    if let Some(expected) = expected
        && downloaded != expected
    {
        return Err(UpdateError::Download(format!(
            "{} was truncated: received {downloaded} of {expected} bytes",
            asset.name
        )));
    }

    info!("Download complete: {downloaded} bytes");
    Ok(format!("{:x}", hasher.finalize()))
}

fn verify_digest(asset: &ReleaseAsset, actual: &str) -> Result<()> {
    let Some(expected) = asset.sha256.as_deref() else {
        debug!("No checksum published for {}, relying on size", asset.name);
        return Ok(());
    };

    if actual.eq_ignore_ascii_case(expected) {
        info!("Checksum verified for {}", asset.name);
        Ok(())
    } else {
        Err(UpdateError::Download(format!(
            "checksum mismatch for {}: expected {expected}, got {actual}",
            asset.name
        )))
    }
}

/// Extract `zip_path` into `dest`, returning the number of files written.
///
/// Entries whose path would escape `dest` abort the extraction. Symlinks and
/// macOS resource-fork folders are skipped. `on_entry` receives
/// `(entries_done, entries_total)` before each entry and once after the last.
pub(crate) fn extract_zip(
    zip_path: &Path,
    dest: &Path,
    cancel: &CancellationToken,
    on_entry: &mut dyn FnMut(u64, u64),
) -> Result<usize> {
    let file = std::fs::File::open(zip_path).map_err(|error| {
        UpdateError::io_with_path("failed to open downloaded archive", zip_path, &error)
    })?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|error| UpdateError::extract("failed to read zip archive", error))?;
    std::fs::create_dir_all(dest).map_err(|error| {
        UpdateError::io_with_path("failed to create payload directory", dest, &error)
    })?;

    let total = archive.len() as u64;
    let mut files = 0;
    for i in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        on_entry(i as u64, total);

        let mut entry = archive
            .by_index(i)
            .map_err(|error| UpdateError::extract("failed to read zip entry", error))?;
        let Some(name) = entry.enclosed_name() else {
            return Err(UpdateError::extract(
                "archive entry escapes the payload directory",
                entry.name(),
            ));
        };
        if name
            .components()
            .next()
            .is_some_and(|first| first.as_os_str() == MACOS_METADATA_DIR)
        {
            continue;
        }
        if entry.is_symlink() {
            warn!("Skipping symlink entry {}", name.display());
            continue;
        }
        let out_path = dest.join(name);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|error| {
                UpdateError::io_with_path("failed to create extraction directory", &out_path, &error)
            })?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                UpdateError::io_with_path(
                    "failed to create extraction parent directory",
                    parent,
                    &error,
                )
            })?;
        }
        let mut outfile = std::fs::File::create(&out_path).map_err(|error| {
            UpdateError::io_with_path("failed to create extracted file", &out_path, &error)
        })?;
        std::io::copy(&mut entry, &mut outfile)
            .map_err(|error| UpdateError::extract("failed to extract archive entry", error))?;
        files += 1;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
            }
        }
    }

    on_entry(total, total);

    if files == 0 {
        return Err(UpdateError::extract(
            "archive contains no files",
            zip_path.display(),
        ));
    }

    debug!("Extracted {files} files to {}", dest.display());
    Ok(files)
}

/// Hoist the contents of a lone top-level directory up into `payload`.
pub(crate) fn collapse_single_root(payload: &Path) -> Result<()> {
    let entries: Vec<PathBuf> = std::fs::read_dir(payload)
        .map_err(|error| UpdateError::io_with_path("failed to read payload", payload, &error))?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_name() != MACOS_METADATA_DIR)
        .map(|entry| entry.path())
        .collect();

    let [root] = entries.as_slice() else {
        return Ok(());
    };
    if !root.is_dir() {
        return Ok(());
    }

    debug!("Collapsing single top-level directory {}", root.display());
    let hoisted = payload.with_extension("root");
    std::fs::rename(root, &hoisted).map_err(|error| {
        UpdateError::io_with_path("failed to hoist payload root", root, &error)
    })?;
    std::fs::remove_dir_all(payload).map_err(|error| {
        UpdateError::io_with_path("failed to clear payload directory", payload, &error)
    })?;
    std::fs::rename(&hoisted, payload).map_err(|error| {
        UpdateError::io_with_path("failed to move payload root into place", payload, &error)
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::path::Path;
    use std::time::{Duration, Instant};

    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::{
        ProgressThrottle, Stager, StagingManifest, TEMP_PREFIX, collapse_single_root, extract_zip,
        sweep_temp_dirs,
    };
    use crate::error::UpdateError;
    use crate::feed::{ReleaseAsset, ReleaseInfo};

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).expect("zip file should be created");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        for (name, content) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, options)
                    .expect("directory entry should be written");
            } else {
                writer
                    .start_file(*name, options)
                    .expect("file entry should be started");
                writer
                    .write_all(content)
                    .expect("file entry should be written");
            }
        }
        writer.finish().expect("zip archive should be finalized");
    }

    #[test]
    fn extract_zip_expands_files_and_directories() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("update.zip");
        let dest = temp.path().join("payload");
        write_zip(&zip_path, &[("nested/", b""), ("nested/app.bin", b"binary-content")]);

        let count = extract_zip(&zip_path, &dest, &CancellationToken::new(), &mut |_, _| {})
            .expect("zip should extract");

        assert_eq!(count, 1);
        let extracted =
            std::fs::read(dest.join("nested/app.bin")).expect("extracted file should be readable");
        assert_eq!(extracted, b"binary-content");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dest.join("nested/app.bin"))
                .expect("metadata should be readable")
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn extract_zip_reports_each_entry() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("update.zip");
        write_zip(
            &zip_path,
            &[("bin/", b""), ("bin/app", b"app"), ("data.pak", b"pak")],
        );
        let mut reports = Vec::new();

        extract_zip(
            &zip_path,
            &temp.path().join("payload"),
            &CancellationToken::new(),
            &mut |done, total| reports.push((done, total)),
        )
        .expect("zip should extract");

        assert_eq!(reports, vec![(0, 3), (1, 3), (2, 3), (3, 3)]);
    }

    #[test]
    fn extract_zip_rejects_unsafe_paths() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("unsafe.zip");
        let dest = temp.path().join("payload");
        write_zip(&zip_path, &[("../outside.txt", b"should not be extracted")]);

        let result = extract_zip(&zip_path, &dest, &CancellationToken::new(), &mut |_, _| {});

        assert!(matches!(result, Err(UpdateError::Extract { .. })));
        assert!(!temp.path().join("outside.txt").exists());
    }

    #[test]
    fn extract_zip_rejects_corrupt_archives() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("corrupt.zip");
        std::fs::write(&zip_path, b"definitely not a zip").expect("file should be written");

        let result = extract_zip(
            &zip_path,
            &temp.path().join("payload"),
            &CancellationToken::new(),
            &mut |_, _| {},
        );

        assert!(matches!(result, Err(UpdateError::Extract { .. })));
    }

    #[test]
    fn extract_zip_stops_when_cancelled() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("update.zip");
        write_zip(&zip_path, &[("a.txt", b"a"), ("b.txt", b"b")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = extract_zip(&zip_path, &temp.path().join("payload"), &cancel, &mut |_, _| {});

        assert!(matches!(result, Err(UpdateError::Cancelled)));
    }

    #[test]
    fn collapse_hoists_lone_directory_ignoring_macos_metadata() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let zip_path = temp.path().join("update.zip");
        let payload = temp.path().join("payload");
        write_zip(
            &zip_path,
            &[
                ("game-1.3.0/app/main.bin", b"new"),
                ("game-1.3.0/readme.txt", b"hi"),
                ("__MACOSX/game-1.3.0/._readme.txt", b"junk"),
            ],
        );

        extract_zip(&zip_path, &payload, &CancellationToken::new(), &mut |_, _| {})
            .expect("zip should extract");
        collapse_single_root(&payload).expect("collapse should succeed");

        assert_eq!(
            std::fs::read(payload.join("app/main.bin")).expect("hoisted file should exist"),
            b"new"
        );
        assert!(payload.join("readme.txt").exists());
        assert!(!payload.join("game-1.3.0").exists());
        assert!(!payload.join("__MACOSX").exists());
    }

    #[test]
    fn collapse_leaves_multi_entry_payload_alone() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let payload = temp.path().join("payload");
        std::fs::create_dir_all(payload.join("app")).expect("dir should be created");
        std::fs::write(payload.join("version.txt"), "1.3.0").expect("file should be written");

        collapse_single_root(&payload).expect("collapse should succeed");

        assert!(payload.join("app").is_dir());
        assert!(payload.join("version.txt").is_file());
    }

    #[test]
    fn throttle_limits_events_to_percent_steps_and_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(throttle.should_emit(0, 10_000, start));
        assert!(!throttle.should_emit(5, 10_000, start + Duration::from_millis(1)));
        assert!(throttle.should_emit(100, 10_000, start + Duration::from_millis(2)));
        assert!(!throttle.should_emit(150, 10_000, start + Duration::from_millis(3)));
        assert!(throttle.should_emit(160, 10_000, start + Duration::from_millis(200)));

        let emitted = (0..=10_000_u64)
            .step_by(7)
            .filter(|done| throttle.should_emit(*done, 10_000, start + Duration::from_millis(250)))
            .count();
        assert!(emitted <= 101, "emitted {emitted} events");
    }

    #[test]
    fn sweep_removes_only_stage_temp_dirs() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        std::fs::create_dir(temp.path().join(format!("{TEMP_PREFIX}abc")))
            .expect("temp dir should be created");
        std::fs::create_dir(temp.path().join("staging")).expect("staging should be created");

        assert_eq!(sweep_temp_dirs(temp.path()), 1);
        assert!(temp.path().join("staging").exists());
    }

    #[tokio::test]
    async fn cancelled_stage_leaves_nothing_behind() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let staging = temp.path().join("updates").join("staging");
        let stager = Stager::new(reqwest::Client::new(), &staging);
        let release = ReleaseInfo {
            version: "1.3.0".to_string(),
            tag: "v1.3.0".to_string(),
            assets: Vec::new(),
            notes: String::new(),
            is_prerelease: false,
        };
        let asset = ReleaseAsset {
            name: "updraft-linux-x64.zip".to_string(),
            url: "http://127.0.0.1:9/never".to_string(),
            size: 10,
            sha256: None,
        };
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = stager.prepare_staging(&release, &asset, &tx, &cancel).await;

        assert!(matches!(result, Err(UpdateError::Cancelled)));
        assert!(!staging.exists());
        let leftovers: Vec<_> = std::fs::read_dir(temp.path().join("updates"))
            .expect("updates dir should exist")
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn manifest_read_reports_missing_and_malformed() {
        let temp = tempfile::tempdir().expect("tempdir should be created");

        assert!(matches!(
            StagingManifest::read(temp.path()),
            Err(UpdateError::Filesystem { .. })
        ));

        std::fs::write(temp.path().join(super::MANIFEST_FILE), "[]")
            .expect("manifest should be written");
        assert!(matches!(
            StagingManifest::read(temp.path()),
            Err(UpdateError::Parse { .. })
        ));
    }
}
