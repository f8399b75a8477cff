//! Core update logic for Updraft.
//!
//! This crate holds everything the host application needs to keep itself up
//! to date, independent of any UI:
//! - Version comparison under a release channel.
//! - Release feed fetching and asset selection.
//! - Scheduled, single-flight update checks.
//! - Downloading, verifying and staging a release payload.
//! - Launching the applier and recovering from a failed apply.

pub mod checker;
mod error;
pub mod feed;
mod installed;
pub mod launch;
mod lock;
mod preserve;
pub mod recovery;
pub mod service;
pub mod staging;
mod state;
pub mod version;

/// Update check scheduling and its outcomes.
pub use checker::{CheckOutcome, CheckerPhase, SkipReason, UpdateCandidate, UpdateChecker};
/// Error taxonomy shared by every update operation.
pub use error::{Result, UpdateError};
/// Release feed model, asset selection and the HTTP feed client.
pub use feed::{ReleaseAsset, ReleaseFeed, ReleaseInfo, ReleaseSource, build_http_client};
/// Installed version descriptor reader.
pub use installed::InstalledVersion;
/// Applier command line and detached launch.
pub use launch::{ApplyRequest, spawn_applier};
/// Advisory lock serialising stage and apply runs.
pub use lock::StagingLock;
/// User-owned paths an update must not touch.
pub use preserve::{DEFAULT_PRESERVED_PATHS, PreservedPathSet};
/// Orphaned staging detection and cleanup.
pub use recovery::{ApplyFailure, OrphanedStaging, discard, find_orphaned_staging};
/// Host-facing background service and its events.
pub use service::{UpdateEvent, Updater};
/// Payload staging and its manifest.
pub use staging::{ProgressThrottle, Stager, StagingManifest, UpdateProgress};
/// Persisted update settings.
pub use state::UpdateState;
/// Channel policy and version comparison.
pub use version::{Channel, VersionTuple, is_newer};
