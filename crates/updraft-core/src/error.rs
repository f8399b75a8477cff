use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("network error during {operation}: {details}")]
    Network {
        operation: &'static str,
        details: String,
    },
    #[error("failed to parse {what}: {details}")]
    Parse { what: &'static str, details: String },
    #[error("release {tag} has no asset named '{name}'")]
    MissingAsset { tag: String, name: String },
    #[error("release {tag} has no unambiguous update asset (candidates: {})", format_candidates(.candidates))]
    AmbiguousAsset { tag: String, candidates: Vec<String> },
    #[error("download failed: {0}")]
    Download(String),
    #[error("{context}: {details}")]
    Extract {
        context: &'static str,
        details: String,
    },
    #[error("{context}: {source}")]
    Filesystem {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("process {pid} did not exit within {seconds} seconds")]
    Timeout { pid: u32, seconds: u64 },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("update operation was cancelled")]
    Cancelled,
    #[error("another update operation holds {0}")]
    Busy(String),
}

fn format_candidates(candidates: &[String]) -> String {
    if candidates.is_empty() {
        "none".to_string()
    } else {
        candidates.join(", ")
    }
}

impl UpdateError {
    pub(crate) fn network(operation: &'static str, details: impl ToString) -> Self {
        Self::Network {
            operation,
            details: details.to_string(),
        }
    }

    pub(crate) fn parse(what: &'static str, details: impl ToString) -> Self {
        Self::Parse {
            what,
            details: details.to_string(),
        }
    }

    pub(crate) fn extract(context: &'static str, details: impl ToString) -> Self {
        Self::Extract {
            context,
            details: details.to_string(),
        }
    }

    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Filesystem { context, source }
    }

    pub fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::io(
            context,
            std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        )
    }

    /// Whether the failure came from talking to or understanding the release
    /// feed, as opposed to local state.
    #[must_use]
    pub fn is_feed_failure(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Parse { .. })
    }
}

pub type Result<T, E = UpdateError> = std::result::Result<T, E>;
