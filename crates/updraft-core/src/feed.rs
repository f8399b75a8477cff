use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;

use crate::error::{Result, UpdateError};
use crate::version::{Channel, VersionTuple};

const DEFAULT_RELEASES_URL: &str = "https://api.github.com/repos/updraft-rs/updraft/releases";
const RELEASES_URL_ENV: &str = "UPDRAFT_RELEASES_URL";
const HTTP_TIMEOUT_ENV: &str = "UPDRAFT_HTTP_TIMEOUT_SECS";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PRODUCT_NAME: &str = "updraft";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub url: String,
    pub size: u64,
    pub sha256: Option<String>,
}

/// Snapshot of one release as published on the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub version: String,
    pub tag: String,
    pub assets: Vec<ReleaseAsset>,
    pub notes: String,
    pub is_prerelease: bool,
}

impl ReleaseInfo {
    /// Pick the payload asset for this release.
    ///
    /// An explicit `override_name` must match exactly. Otherwise the asset
    /// called `default_name` wins, then the only `.zip` asset.
    ///
    /// # Errors
    /// Returns [`UpdateError::MissingAsset`] when the override is absent and
    /// [`UpdateError::AmbiguousAsset`] when zero or several archives qualify.
    pub fn select_asset(
        &self,
        override_name: Option<&str>,
        default_name: Option<&str>,
    ) -> Result<&ReleaseAsset> {
        if let Some(name) = override_name.filter(|name| !name.is_empty()) {
            return self
                .assets
                .iter()
                .find(|asset| asset.name == name)
                .ok_or_else(|| UpdateError::MissingAsset {
                    tag: self.tag.clone(),
                    name: name.to_string(),
                });
        }

        if let Some(asset) = default_name
            .and_then(|name| self.assets.iter().find(|asset| asset.name == name))
        {
            return Ok(asset);
        }

        let archives: Vec<&ReleaseAsset> = self
            .assets
            .iter()
            .filter(|asset| is_supported_archive(&asset.name))
            .collect();
        match archives.as_slice() {
            [single] => Ok(*single),
            _ => Err(UpdateError::AmbiguousAsset {
                tag: self.tag.clone(),
                candidates: archives.iter().map(|asset| asset.name.clone()).collect(),
            }),
        }
    }

    /// Release notes trimmed for a prompt, ending in an ellipsis when cut.
    #[must_use]
    pub fn notes_excerpt(&self, max_chars: usize) -> String {
        let notes = self.notes.trim();
        if notes.chars().count() <= max_chars {
            return notes.to_string();
        }
        let cut: String = notes.chars().take(max_chars).collect();
        format!("{}\u{2026}", cut.trim_end())
    }
}

pub(crate) fn is_supported_archive(name: &str) -> bool {
    std::path::Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Name of the payload archive published for this platform.
#[must_use]
pub fn default_asset_name() -> Option<String> {
    let platform = if cfg!(target_os = "macos") && cfg!(target_arch = "aarch64") {
        "macos-arm64"
    } else if cfg!(target_os = "macos") && cfg!(target_arch = "x86_64") {
        "macos-x64"
    } else if cfg!(target_os = "linux") && cfg!(target_arch = "x86_64") {
        "linux-x64"
    } else if cfg!(target_os = "linux") && cfg!(target_arch = "aarch64") {
        "linux-arm64"
    } else if cfg!(target_os = "windows") && cfg!(target_arch = "x86_64") {
        "windows-x64"
    } else {
        return None;
    };
    Some(format!("{PRODUCT_NAME}-{platform}.zip"))
}

/// Build the HTTP client shared by the feed and the stager.
///
/// The read timeout comes from `UPDRAFT_HTTP_TIMEOUT_SECS` when set; it bounds
/// each read, not a whole download.
///
/// # Errors
/// Returns an error if the TLS backend cannot be initialised.
pub fn build_http_client() -> Result<reqwest::Client> {
    let read_timeout = std::env::var(HTTP_TIMEOUT_ENV)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map_or(DEFAULT_HTTP_TIMEOUT, Duration::from_secs);

    reqwest::Client::builder()
        .user_agent(format!("{PRODUCT_NAME}/{}", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(read_timeout)
        .build()
        .map_err(|error| UpdateError::network("building HTTP client", error))
}

/// Anything that can answer "what is the newest release on this channel".
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn fetch_latest(
        &self,
        channel: Channel,
        asset_override: Option<&str>,
    ) -> Result<Option<ReleaseInfo>>;

    /// Asset name used when no override is configured.
    fn default_asset_name(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct ReleaseFeed {
    client: reqwest::Client,
    endpoint: String,
    default_asset: Option<String>,
}

impl ReleaseFeed {
    #[must_use]
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            default_asset: default_asset_name(),
        }
    }

    /// Feed at `UPDRAFT_RELEASES_URL`, or the project's GitHub releases.
    #[must_use]
    pub fn from_env(client: reqwest::Client) -> Self {
        let endpoint = std::env::var(RELEASES_URL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RELEASES_URL.to_string());
        Self::new(client, endpoint)
    }

    #[must_use]
    pub fn with_default_asset(mut self, name: Option<String>) -> Self {
        self.default_asset = name;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the newest eligible release for `channel`.
    ///
    /// Drafts and releases with unparseable tags are ignored; prereleases are
    /// ignored on the stable channel. Returns `None` when nothing qualifies.
    ///
    /// # Errors
    /// Returns [`UpdateError::Network`] when the feed is unreachable or answers
    /// with a non-success status, [`UpdateError::Parse`] when the payload is
    /// malformed, and the asset-selection errors of
    /// [`ReleaseInfo::select_asset`].
    pub async fn fetch_latest(
        &self,
        channel: Channel,
        asset_override: Option<&str>,
    ) -> Result<Option<ReleaseInfo>> {
        let releases = self.fetch_releases().await?;
        let Some(release) = latest_eligible(releases, channel) else {
            info!("No eligible releases on the {channel} channel");
            return Ok(None);
        };

        let asset = release.select_asset(asset_override, self.default_asset.as_deref())?;
        info!(
            "Latest {channel} release is {} (asset {})",
            release.tag, asset.name
        );
        Ok(Some(release))
    }

    async fn fetch_releases(&self) -> Result<Vec<ReleaseInfo>> {
        debug!("Fetching releases from {}", self.endpoint);
        let response = self
            .client
            .get(&self.endpoint)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|error| UpdateError::network("fetching release feed", error))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_snippet = response
                .text()
                .await
                .ok()
                .map(|body| response_snippet(&body, 160))
                .unwrap_or_default();
            return Err(UpdateError::network(
                "fetching release feed",
                format!("HTTP {status}{body_snippet}"),
            ));
        }

        let body = response
            .bytes()
            .await
            .map_err(|error| UpdateError::network("reading release feed", error))?;
        parse_releases(&body)
    }
}

#[async_trait]
impl ReleaseSource for ReleaseFeed {
    async fn fetch_latest(
        &self,
        channel: Channel,
        asset_override: Option<&str>,
    ) -> Result<Option<ReleaseInfo>> {
        ReleaseFeed::fetch_latest(self, channel, asset_override).await
    }

    fn default_asset_name(&self) -> Option<&str> {
        self.default_asset.as_deref()
    }
}

#[derive(Deserialize)]
struct GitHubAsset {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    browser_download_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    digest: Option<String>,
}

#[derive(Deserialize)]
struct GitHubRelease {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

fn parse_releases(body: &[u8]) -> Result<Vec<ReleaseInfo>> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|error| UpdateError::parse("release feed", error))?;
    let serde_json::Value::Array(entries) = value else {
        return Err(UpdateError::parse(
            "release feed",
            "expected a JSON array of releases",
        ));
    };

    let mut releases = Vec::with_capacity(entries.len());
    for entry in entries {
        let raw: GitHubRelease = match serde_json::from_value(entry) {
            Ok(raw) => raw,
            Err(error) => {
                warn!("Skipping malformed release entry: {error}");
                continue;
            }
        };
        if raw.draft {
            continue;
        }
        releases.push(release_from_raw(raw));
    }
    Ok(releases)
}

fn release_from_raw(raw: GitHubRelease) -> ReleaseInfo {
    let tag = raw.tag_name.trim().to_string();
    let version = tag
        .strip_prefix(['v', 'V'])
        .unwrap_or(&tag)
        .to_string();
    let assets = raw
        .assets
        .into_iter()
        .filter_map(|asset| {
            let name = asset.name.filter(|name| !name.is_empty())?;
            let Some(url) = asset.browser_download_url.or(asset.url) else {
                warn!("Asset {name} of {tag} has no download URL");
                return None;
            };
            Some(ReleaseAsset {
                sha256: asset.digest.as_deref().and_then(parse_sha256_digest),
                name,
                url,
                size: asset.size.unwrap_or(0),
            })
        })
        .collect();

    ReleaseInfo {
        version,
        tag,
        assets,
        notes: raw.body.unwrap_or_default(),
        is_prerelease: raw.prerelease,
    }
}

fn latest_eligible(releases: Vec<ReleaseInfo>, channel: Channel) -> Option<ReleaseInfo> {
    let mut best: Option<(VersionTuple, ReleaseInfo)> = None;
    for release in releases {
        if channel == Channel::Stable && release.is_prerelease {
            continue;
        }
        let Some(version) = VersionTuple::parse(&release.version) else {
            warn!("Skipping release with invalid tag '{}'", release.tag);
            continue;
        };
        if best.as_ref().is_none_or(|(current, _)| version > *current) {
            best = Some((version, release));
        }
    }
    best.map(|(_, release)| release)
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}

fn parse_sha256_digest(digest: &str) -> Option<String> {
    let (algorithm, hash) = digest.split_once(':')?;
    if !algorithm.eq_ignore_ascii_case("sha256") {
        return None;
    }
    if hash.len() != 64 || !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    Some(hash.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> ReleaseAsset {
        ReleaseAsset {
            name: name.to_string(),
            url: format!("https://example.com/{name}"),
            size: 10,
            sha256: None,
        }
    }

    fn release(assets: &[&str]) -> ReleaseInfo {
        ReleaseInfo {
            version: "1.3.0".to_string(),
            tag: "v1.3.0".to_string(),
            assets: assets.iter().map(|name| asset(name)).collect(),
            notes: String::new(),
            is_prerelease: false,
        }
    }

    #[test]
    fn override_must_match_exactly() {
        let release = release(&["app.zip", "App.zip"]);

        let picked = release
            .select_asset(Some("App.zip"), None)
            .expect("exact override should be found");
        assert_eq!(picked.name, "App.zip");

        let error = release
            .select_asset(Some("app"), None)
            .expect_err("partial name should not match");
        assert!(matches!(error, UpdateError::MissingAsset { ref name, .. } if name == "app"));
    }

    #[test]
    fn default_name_wins_over_other_archives() {
        let release = release(&["other.zip", "updraft-linux-x64.zip"]);

        let picked = release
            .select_asset(None, Some("updraft-linux-x64.zip"))
            .expect("default asset should be picked");
        assert_eq!(picked.name, "updraft-linux-x64.zip");
    }

    #[test]
    fn single_archive_is_picked_without_default() {
        let release = release(&["notes.txt", "payload.ZIP"]);

        let picked = release
            .select_asset(None, Some("missing.zip"))
            .expect("sole archive should be picked");
        assert_eq!(picked.name, "payload.ZIP");
    }

    #[test]
    fn zero_or_many_archives_are_ambiguous() {
        let none = release(&["notes.txt"]);
        assert!(matches!(
            none.select_asset(None, None),
            Err(UpdateError::AmbiguousAsset { ref candidates, .. }) if candidates.is_empty()
        ));

        let many = release(&["a.zip", "b.zip"]);
        assert!(matches!(
            many.select_asset(None, None),
            Err(UpdateError::AmbiguousAsset { ref candidates, .. }) if candidates.len() == 2
        ));
    }

    #[test]
    fn notes_excerpt_truncates_with_ellipsis() {
        let mut info = release(&[]);
        info.notes = "  short notes \n".to_string();
        assert_eq!(info.notes_excerpt(800), "short notes");

        info.notes = "abcdef".repeat(10);
        let excerpt = info.notes_excerpt(5);
        assert_eq!(excerpt, "abcde\u{2026}");
    }

    #[test]
    fn parse_releases_skips_drafts_and_reads_assets() {
        let body = serde_json::json!([
            {"tag_name": "v2.0.0", "draft": true, "assets": []},
            {
                "tag_name": "v1.3.0",
                "prerelease": false,
                "body": "Fixes",
                "assets": [
                    {
                        "name": "app.zip",
                        "url": "https://api.example.com/assets/1",
                        "browser_download_url": "https://example.com/app.zip",
                        "size": 42,
                        "digest": "sha256:50639D63848D275A7EFCD04478DE62CA0DF8F35DFD75BE490E4FCAE667ECD436"
                    },
                    {"name": "", "browser_download_url": "https://example.com/blank"}
                ]
            }
        ])
        .to_string();

        let releases = parse_releases(body.as_bytes()).expect("feed should parse");

        assert_eq!(releases.len(), 1);
        let release = &releases[0];
        assert_eq!(release.version, "1.3.0");
        assert_eq!(release.notes, "Fixes");
        assert_eq!(release.assets.len(), 1);
        assert_eq!(release.assets[0].url, "https://example.com/app.zip");
        assert_eq!(release.assets[0].size, 42);
        assert_eq!(
            release.assets[0].sha256.as_deref(),
            Some("50639d63848d275a7efcd04478de62ca0df8f35dfd75be490e4fcae667ecd436")
        );
    }

    #[test]
    fn parse_releases_rejects_non_array_payload() {
        let error = parse_releases(br#"{"message": "Not Found"}"#)
            .expect_err("object payload should be rejected");
        assert!(matches!(error, UpdateError::Parse { .. }));

        let error = parse_releases(b"<html>").expect_err("html payload should be rejected");
        assert!(matches!(error, UpdateError::Parse { .. }));
    }

    #[test]
    fn latest_eligible_respects_channel_and_ordering() {
        let mut stable = release(&[]);
        stable.version = "1.3.0".to_string();
        let mut beta = release(&[]);
        beta.version = "1.4.0-beta.1".to_string();
        beta.tag = "v1.4.0-beta.1".to_string();
        beta.is_prerelease = true;
        let mut broken = release(&[]);
        broken.version = "latest".to_string();
        broken.tag = "latest".to_string();
        let mut older = release(&[]);
        older.version = "1.2.9".to_string();

        let releases = vec![older, broken, beta, stable];

        let picked = latest_eligible(releases.clone(), Channel::Stable)
            .expect("a stable release should be eligible");
        assert_eq!(picked.version, "1.3.0");

        let picked = latest_eligible(releases, Channel::Prerelease)
            .expect("a prerelease should be eligible");
        assert_eq!(picked.version, "1.4.0-beta.1");
    }

    #[test]
    fn parse_sha256_digest_rejects_invalid_values() {
        assert!(parse_sha256_digest("sha1:abc").is_none());
        assert!(parse_sha256_digest("sha256:not-hex").is_none());
        assert!(parse_sha256_digest("sha256:abcd").is_none());
    }
}
