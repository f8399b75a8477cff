use std::path::{Component, Path};

/// Install-relative paths owned by the user that an update must never create,
/// overwrite or delete.
pub const DEFAULT_PRESERVED_PATHS: &[&str] = &["Campaigns/", "config/config.ini"];

/// Fixed list of preserved path patterns.
///
/// A pattern matches a path when the path's components start with the
/// pattern's components, so `Campaigns/` matches `Campaigns/save1.dat`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreservedPathSet {
    patterns: Vec<Vec<String>>,
    raw: Vec<String>,
}

impl PreservedPathSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let components = split_components(Path::new(pattern));
            if components.is_empty() {
                continue;
            }
            set.patterns.push(components);
            set.raw.push(pattern.to_string());
        }
        set
    }

    #[must_use]
    pub fn host_defaults() -> Self {
        Self::new(DEFAULT_PRESERVED_PATHS.iter().copied())
    }

    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.raw
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `relative` (relative to the install root) is preserved.
    #[must_use]
    pub fn matches(&self, relative: &Path) -> bool {
        let components = split_components(relative);
        if components.is_empty() {
            return false;
        }
        self.patterns
            .iter()
            .any(|pattern| components.starts_with(pattern))
    }
}

fn split_components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(normalize(&part.to_string_lossy())),
            _ => None,
        })
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(windows)]
fn normalize(part: &str) -> String {
    part.to_lowercase()
}

#[cfg(not(windows))]
fn normalize(part: &str) -> String {
    part.to_string()
}
