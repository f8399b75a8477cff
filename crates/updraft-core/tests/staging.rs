use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;

use mockito::Server;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use updraft_core::{ReleaseAsset, ReleaseInfo, Stager, StagingLock, StagingManifest, UpdateError, UpdateProgress};

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o644);
    for (name, content) in entries {
        writer
            .start_file(*name, options)
            .expect("file entry should be started");
        writer
            .write_all(content)
            .expect("file entry should be written");
    }
    writer
        .finish()
        .expect("zip archive should be finalized")
        .into_inner()
}

fn release(asset: &ReleaseAsset) -> ReleaseInfo {
    ReleaseInfo {
        version: "1.3.0".to_string(),
        tag: "v1.3.0".to_string(),
        assets: vec![asset.clone()],
        notes: String::new(),
        is_prerelease: false,
    }
}

fn tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).expect("directory should be readable") {
            let path = entry.expect("entry should be readable").path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let relative = path
                    .strip_prefix(root)
                    .expect("path should be under root")
                    .to_string_lossy()
                    .replace('\\', "/");
                files.insert(relative, std::fs::read(&path).expect("file should be readable"));
            }
        }
    }
    files
}

fn stage_leftovers(updates: &Path) -> usize {
    std::fs::read_dir(updates)
        .expect("updates dir should exist")
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".stage-"))
        .count()
}

async fn serve_asset(server: &mut mockito::ServerGuard, body: &[u8]) -> mockito::Mock {
    server
        .mock("GET", "/updraft-linux-x64.zip")
        .with_status(200)
        .with_header("content-type", "application/zip")
        .with_body(body)
        .create_async()
        .await
}

fn asset_for(server: &mockito::ServerGuard, body: &[u8], sha256: Option<String>) -> ReleaseAsset {
    ReleaseAsset {
        name: "updraft-linux-x64.zip".to_string(),
        url: format!("{}/updraft-linux-x64.zip", server.url()),
        size: body.len() as u64,
        sha256,
    }
}

#[tokio::test]
async fn stages_payload_with_manifest_and_progress() {
    let body = zip_bytes(&[
        ("updraft-1.3.0/app/main.bin", b"new binary"),
        ("updraft-1.3.0/config/config.ini", b"[defaults]"),
    ]);
    let digest = format!("{:x}", Sha256::digest(&body));
    let mut server = Server::new_async().await;
    let mock = serve_asset(&mut server, &body).await;
    let asset = asset_for(&server, &body, Some(digest));

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let staging = temp.path().join("updates").join("staging");
    let stager = Stager::new(reqwest::Client::new(), &staging);
    let (tx, mut rx) = mpsc::channel(256);

    let manifest = stager
        .prepare_staging(&release(&asset), &asset, &tx, &CancellationToken::new())
        .await
        .expect("staging should succeed");
    drop(tx);

    mock.assert_async().await;
    assert_eq!(manifest.version, "1.3.0");
    assert_eq!(manifest.source_release_id, "v1.3.0");
    assert_eq!(manifest.staging_root, staging);
    assert_eq!(manifest.payload_dir, staging.join("payload"));
    assert_eq!(
        StagingManifest::read(&staging).expect("manifest should be readable"),
        manifest
    );
    assert_eq!(
        std::fs::read(staging.join("payload/app/main.bin")).expect("payload file should exist"),
        b"new binary"
    );
    assert!(!staging.join("updraft-linux-x64.zip").exists());
    assert_eq!(stage_leftovers(&temp.path().join("updates")), 0);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let total = body.len() as u64;
    assert!(events.contains(&UpdateProgress::Downloading {
        downloaded: total,
        total
    }));
    assert!(events.iter().any(|event| matches!(
        event,
        UpdateProgress::Extracting { extracted, total } if *total > 0 && extracted == total
    )));
    assert_eq!(events.last(), Some(&UpdateProgress::Staged));
}

#[tokio::test]
async fn restaging_same_release_is_identical() {
    let body = zip_bytes(&[("app/main.bin", b"v1.3.0"), ("data/table.csv", b"a,b")]);
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/updraft-linux-x64.zip")
        .with_status(200)
        .with_body(&body)
        .expect(2)
        .create_async()
        .await;
    let asset = asset_for(&server, &body, None);

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let staging = temp.path().join("updates").join("staging");
    let stager = Stager::new(reqwest::Client::new(), &staging);
    let (tx, _rx) = mpsc::channel(256);
    let cancel = CancellationToken::new();

    let first = stager
        .prepare_staging(&release(&asset), &asset, &tx, &cancel)
        .await
        .expect("first staging should succeed");
    let first_tree = tree(&staging.join("payload"));

    std::fs::write(staging.join("payload/stray.txt"), "left over").expect("stray file should be written");
    std::fs::create_dir_all(temp.path().join("updates/.stage-crashed"))
        .expect("crashed scratch dir should be created");

    let second = stager
        .prepare_staging(&release(&asset), &asset, &tx, &cancel)
        .await
        .expect("second staging should succeed");

    assert_eq!(tree(&staging.join("payload")), first_tree);
    assert_eq!(first.version, second.version);
    assert_eq!(first.payload_dir, second.payload_dir);
    assert_eq!(stage_leftovers(&temp.path().join("updates")), 0);
}

#[tokio::test]
async fn size_mismatch_is_download_error() {
    let body = zip_bytes(&[("app/main.bin", b"payload")]);
    let mut server = Server::new_async().await;
    let _mock = serve_asset(&mut server, &body).await;
    let mut asset = asset_for(&server, &body, None);
    asset.size += 1;

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let staging = temp.path().join("updates").join("staging");
    let stager = Stager::new(reqwest::Client::new(), &staging);
    let (tx, _rx) = mpsc::channel(256);

    let error = stager
        .prepare_staging(&release(&asset), &asset, &tx, &CancellationToken::new())
        .await
        .expect_err("size mismatch should fail");

    assert!(matches!(error, UpdateError::Download(_)));
    assert!(!staging.exists());
    assert_eq!(stage_leftovers(&temp.path().join("updates")), 0);
}

#[tokio::test]
async fn checksum_mismatch_is_download_error() {
    let body = zip_bytes(&[("app/main.bin", b"payload")]);
    let mut server = Server::new_async().await;
    let _mock = serve_asset(&mut server, &body).await;
    let asset = asset_for(&server, &body, Some("0".repeat(64)));

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let staging = temp.path().join("updates").join("staging");
    let stager = Stager::new(reqwest::Client::new(), &staging);
    let (tx, _rx) = mpsc::channel(256);

    let error = stager
        .prepare_staging(&release(&asset), &asset, &tx, &CancellationToken::new())
        .await
        .expect_err("checksum mismatch should fail");

    assert!(matches!(error, UpdateError::Download(ref message) if message.contains("checksum")));
    assert!(!staging.exists());
}

#[tokio::test]
async fn not_found_is_download_error() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/updraft-linux-x64.zip")
        .with_status(404)
        .create_async()
        .await;
    let asset = asset_for(&server, b"", None);

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let stager = Stager::new(reqwest::Client::new(), temp.path().join("updates/staging"));
    let (tx, _rx) = mpsc::channel(8);

    let error = stager
        .prepare_staging(&release(&asset), &asset, &tx, &CancellationToken::new())
        .await
        .expect_err("HTTP 404 should fail");

    assert!(matches!(error, UpdateError::Download(ref message) if message.contains("404")));
}

#[tokio::test]
async fn corrupt_archive_is_extract_error() {
    let body = b"this is not a zip archive".to_vec();
    let mut server = Server::new_async().await;
    let _mock = serve_asset(&mut server, &body).await;
    let asset = asset_for(&server, &body, None);

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let staging = temp.path().join("updates").join("staging");
    let stager = Stager::new(reqwest::Client::new(), &staging);
    let (tx, _rx) = mpsc::channel(256);

    let error = stager
        .prepare_staging(&release(&asset), &asset, &tx, &CancellationToken::new())
        .await
        .expect_err("corrupt archive should fail");

    assert!(matches!(error, UpdateError::Extract { .. }));
    assert!(!staging.exists());
    assert_eq!(stage_leftovers(&temp.path().join("updates")), 0);
}

#[tokio::test]
async fn held_lock_makes_stager_busy() {
    let temp = tempfile::tempdir().expect("tempdir should be created");
    let staging = temp.path().join("updates").join("staging");
    let _held = StagingLock::acquire(&staging).expect("lock should be acquired");
    let asset = ReleaseAsset {
        name: "updraft-linux-x64.zip".to_string(),
        url: "http://127.0.0.1:9/unused.zip".to_string(),
        size: 1,
        sha256: None,
    };
    let stager = Stager::new(reqwest::Client::new(), &staging);
    let (tx, _rx) = mpsc::channel(8);

    let error = stager
        .prepare_staging(&release(&asset), &asset, &tx, &CancellationToken::new())
        .await
        .expect_err("busy lock should fail");

    assert!(matches!(error, UpdateError::Busy(_)));
}
