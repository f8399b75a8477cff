use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Release channel a host is subscribed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stable,
    Prerelease,
}

impl Channel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Prerelease => "prerelease",
        }
    }

    /// Parse a channel name, falling back to [`Channel::Stable`] for anything
    /// unrecognised.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "prerelease" => Ok(Self::Prerelease),
            other => Err(format!("unknown update channel '{other}'")),
        }
    }
}

/// Dotted numeric version, compared component-wise with missing trailing
/// components treated as zero.
///
/// A pre-release tag (`-beta.1`) ranks below the same numbers without one.
/// Build metadata (`+abc`) is ignored.
#[derive(Debug, Clone)]
pub struct VersionTuple {
    numbers: Vec<u64>,
    pre_release: Option<String>,
}

impl VersionTuple {
    /// Parse `v1.2.3`, `1.2`, `1.3.0-beta.1` and similar.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let trimmed = trimmed
            .strip_prefix(['v', 'V'])
            .unwrap_or(trimmed);
        let (core, pre_release) = split_core_and_pre_release(trimmed);
        if core.is_empty() {
            return None;
        }

        let numbers = core
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    None
                } else {
                    part.parse::<u64>().ok()
                }
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            numbers,
            pre_release: pre_release.map(str::to_string),
        })
    }

    #[must_use]
    pub fn components(&self) -> &[u64] {
        &self.numbers
    }

    #[must_use]
    pub fn pre_release(&self) -> Option<&str> {
        self.pre_release.as_deref()
    }

    fn cmp_numbers(&self, other: &Self) -> Ordering {
        let len = self.numbers.len().max(other.numbers.len());
        (0..len)
            .map(|i| {
                let left = self.numbers.get(i).copied().unwrap_or(0);
                let right = other.numbers.get(i).copied().unwrap_or(0);
                left.cmp(&right)
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialEq for VersionTuple {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionTuple {}

impl PartialOrd for VersionTuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionTuple {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_numbers(other).then_with(|| {
            match (self.pre_release.as_deref(), other.pre_release.as_deref()) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(left), Some(right)) => cmp_pre_release(left, right),
            }
        })
    }
}

/// Dot-separated identifier ordering: numeric identifiers compare as numbers
/// and sort before alphanumeric ones; a shorter prefix sorts first.
fn cmp_pre_release(left: &str, right: &str) -> Ordering {
    let mut left_ids = left.split('.');
    let mut right_ids = right.split('.');
    loop {
        match (left_ids.next(), right_ids.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => {
                let ordering = match (a.parse::<u64>(), b.parse::<u64>()) {
                    (Ok(a), Ok(b)) => a.cmp(&b),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()),
                };
                if ordering.is_ne() {
                    return ordering;
                }
            }
        }
    }
}

impl fmt::Display for VersionTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.numbers.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join("."))?;
        match &self.pre_release {
            Some(tag) => write!(f, "-{tag}"),
            None => Ok(()),
        }
    }
}

fn split_core_and_pre_release(version: &str) -> (&str, Option<&str>) {
    let without_build = version.split_once('+').map_or(version, |(head, _)| head);
    match without_build.split_once('-') {
        Some((core, tag)) => (core, Some(tag).filter(|tag| !tag.is_empty())),
        None => (without_build, None),
    }
}

/// Decide whether `candidate` should be offered over `installed`.
///
/// Unparseable input on either side is never newer. On the stable channel a
/// prerelease candidate is never newer.
#[must_use]
pub fn is_newer(installed: &str, candidate: &str, candidate_prerelease: bool, channel: Channel) -> bool {
    if channel == Channel::Stable && candidate_prerelease {
        return false;
    }

    match (VersionTuple::parse(installed), VersionTuple::parse(candidate)) {
        (Some(installed), Some(candidate)) => candidate > installed,
        _ => false,
    }
}
