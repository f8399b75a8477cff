//! Reading the version of the running installation.

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Result, UpdateError};
use crate::version::VersionTuple;

/// Local descriptor file naming the installed version.
///
/// Accepts a bare version on the first meaningful line, Windows resource
/// style `FileVersion`/`ProductVersion` lines, or `filevers=(1, 2, 0, 0)`
/// tuples.
#[derive(Debug, Clone)]
pub struct InstalledVersion {
    path: PathBuf,
}

impl InstalledVersion {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the descriptor.
    ///
    /// # Errors
    /// Returns [`UpdateError::Filesystem`] when the file cannot be read and
    /// [`UpdateError::Parse`] when no version string can be found in it.
    pub fn read(&self) -> Result<String> {
        let bytes = std::fs::read(&self.path).map_err(|error| {
            UpdateError::io_with_path("failed to read version descriptor", &self.path, &error)
        })?;
        let text = String::from_utf8_lossy(&bytes);
        let version = parse_descriptor(&text).ok_or_else(|| {
            UpdateError::parse(
                "version descriptor",
                format!("no version string in {}", self.path.display()),
            )
        })?;
        debug!("Detected installed version {version}");
        Ok(version)
    }
}

fn parse_descriptor(text: &str) -> Option<String> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();

    let tagged = lines.iter().find_map(|line| {
        let is_tagged = line.contains("FileVersion")
            || line.contains("ProductVersion")
            || line.starts_with("filevers")
            || line.starts_with("prodvers");
        if is_tagged {
            extract_version(line)
        } else {
            None
        }
    });

    tagged.or_else(|| {
        lines
            .first()
            .filter(|line| VersionTuple::parse(line).is_some())
            .map(|line| line.trim_start_matches(['v', 'V']).to_string())
    })
}

fn extract_version(line: &str) -> Option<String> {
    if let Some(dotted) = find_dotted_run(line) {
        return Some(dotted.to_string());
    }

    let inner = line.split_once('(')?.1.split(')').next()?;
    let digits: Vec<&str> = inner
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
        .collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits.join("."))
    }
}

/// First run like `1.2` or `1.2.3.4` inside `line`.
fn find_dotted_run(line: &str) -> Option<&str> {
    let bytes = line.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        if !bytes[start].is_ascii_digit() {
            start += 1;
            continue;
        }
        let mut end = start;
        let mut dots = 0;
        while end < bytes.len() {
            if bytes[end].is_ascii_digit() {
                end += 1;
            } else if bytes[end] == b'.' && bytes.get(end + 1).is_some_and(u8::is_ascii_digit) {
                dots += 1;
                end += 1;
            } else {
                break;
            }
        }
        if dots > 0 {
            return Some(&line[start..end]);
        }
        start = end;
    }
    None
}
