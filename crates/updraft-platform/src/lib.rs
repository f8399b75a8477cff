//! Platform glue shared by the host-side updater and the applier process.

pub mod commands;
mod paths;
pub mod process;

/// Extension trait that detaches a spawned command from the caller's lifetime.
pub use commands::DetachExt;
pub use paths::{AppPaths, AppPathsError};
