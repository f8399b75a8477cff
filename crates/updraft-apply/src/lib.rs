//! The applier: a short-lived process that swaps a staged update into an
//! installation after the host has exited.
//!
//! Protocol:
//! - validate arguments and the staging manifest, without side effects;
//! - take the staging lock;
//! - wait for the host process to exit;
//! - plan which payload files to copy and which preserved paths to skip;
//! - replace files one by one with atomic renames;
//! - optionally delete files the new release dropped and relaunch the host;
//! - remove staging and cleanup roots, or record the failure in staging.

pub mod args;
pub mod copy;
pub mod logging;
pub mod wait;

use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use chrono::Utc;
use log::{error, info, warn};
use updraft_core::staging::PAYLOAD_DIR;
use updraft_core::{ApplyFailure, PreservedPathSet, StagingLock, StagingManifest, UpdateError};
use updraft_platform::DetachExt;

pub use args::ApplyArgs;

pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = updraft_core::launch::DEFAULT_WAIT_TIMEOUT_SECS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStatus {
    Succeeded,
    TimedOut,
    CopyFailed,
    InvalidArguments,
}

impl ApplyStatus {
    #[must_use]
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Succeeded => 0,
            Self::TimedOut => 1,
            Self::CopyFailed => 2,
            Self::InvalidArguments => 3,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::TimedOut => "timed_out",
            Self::CopyFailed => "copy_failed",
            Self::InvalidArguments => "invalid_arguments",
        }
    }
}

#[derive(Debug)]
pub struct ApplyResult {
    pub status: ApplyStatus,
    pub skipped_preserved_paths: Vec<PathBuf>,
    pub copied_count: usize,
    pub error: Option<UpdateError>,
}

impl ApplyResult {
    fn failed(status: ApplyStatus, error: UpdateError) -> Self {
        Self {
            status,
            skipped_preserved_paths: Vec::new(),
            copied_count: 0,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }
}

struct Validated {
    manifest: StagingManifest,
    payload: PathBuf,
    preserved: PreservedPathSet,
}

fn validate(args: &ApplyArgs) -> Result<Validated, UpdateError> {
    if !args.staging_dir.is_dir() {
        return Err(UpdateError::InvalidArgument(format!(
            "staging directory {} does not exist",
            args.staging_dir.display()
        )));
    }
    if !args.install_dir.is_dir() {
        return Err(UpdateError::InvalidArgument(format!(
            "install directory {} does not exist",
            args.install_dir.display()
        )));
    }

    let manifest = StagingManifest::read(&args.staging_dir)
        .map_err(|error| UpdateError::InvalidArgument(format!("unusable staging manifest: {error}")))?;
    let payload = args.staging_dir.join(PAYLOAD_DIR);
    if !payload.is_dir() {
        return Err(UpdateError::InvalidArgument(format!(
            "staging directory {} has no payload",
            args.staging_dir.display()
        )));
    }

    if args.restart {
        let Some(host_exe) = &args.host_exe else {
            return Err(UpdateError::InvalidArgument(
                "--restart needs --host-exe".to_string(),
            ));
        };
        let escapes = host_exe
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
        if escapes || host_exe.as_os_str().is_empty() {
            return Err(UpdateError::InvalidArgument(format!(
                "host executable {} must be relative to the install directory",
                host_exe.display()
            )));
        }
    }

    let preserved = if args.preserve.is_empty() {
        PreservedPathSet::host_defaults()
    } else {
        PreservedPathSet::new(&args.preserve)
    };

    Ok(Validated {
        manifest,
        payload,
        preserved,
    })
}

/// Run the whole apply protocol.
///
/// Never panics on bad input; every outcome is reported through the returned
/// status.
#[must_use]
pub fn run(args: &ApplyArgs) -> ApplyResult {
    let validated = match validate(args) {
        Ok(validated) => validated,
        Err(error) => {
            error!("Refusing to apply: {error}");
            return ApplyResult::failed(ApplyStatus::InvalidArguments, error);
        }
    };

    let lock = match StagingLock::acquire(&args.staging_dir) {
        Ok(lock) => lock,
        Err(error) => {
            error!("Cannot lock staging directory: {error}");
            let error = UpdateError::InvalidArgument(format!("staging is in use: {error}"));
            return ApplyResult::failed(ApplyStatus::InvalidArguments, error);
        }
    };

    info!(
        "Applying {} from {} to {}",
        validated.manifest.version,
        args.staging_dir.display(),
        args.install_dir.display()
    );

    let result = apply_locked(args, &validated);
    if result.status == ApplyStatus::Succeeded {
        finish(args);
    } else {
        record_failure(args, &result);
    }
    drop(lock);
    result
}

fn apply_locked(args: &ApplyArgs, validated: &Validated) -> ApplyResult {
    if let Some(pid) = args.wait_pid
        && let Err(error) = wait::wait_for_exit(
            pid,
            Duration::from_secs(args.wait_timeout),
            wait::POLL_INTERVAL,
        )
    {
        error!("{error}; install directory left untouched");
        return ApplyResult::failed(ApplyStatus::TimedOut, error);
    }

    let plan = match copy::plan(&validated.payload, &validated.preserved) {
        Ok(plan) => plan,
        Err(error) => return ApplyResult::failed(ApplyStatus::CopyFailed, error),
    };
    for skipped in &plan.skipped {
        info!("Preserving {}", skipped.display());
    }

    let mut copied = 0;
    let copy_result = copy::apply(&plan, &validated.payload, &args.install_dir, &mut copied)
        .and_then(|()| {
            if args.delete_removed {
                let keep = [args.staging_dir.clone()]
                    .into_iter()
                    .chain(args.cleanup_roots.iter().cloned())
                    .collect::<Vec<_>>();
                copy::delete_removed(&plan, &args.install_dir, &validated.preserved, &keep)
                    .map(|_| ())
            } else {
                Ok(())
            }
        });

    let (status, error) = match copy_result {
        Ok(()) => (ApplyStatus::Succeeded, None),
        Err(error) => {
            error!("Copy stopped after {copied} files: {error}");
            (ApplyStatus::CopyFailed, Some(error))
        }
    };

    if status == ApplyStatus::Succeeded && args.restart {
        relaunch(args);
    }

    ApplyResult {
        status,
        skipped_preserved_paths: plan.skipped,
        copied_count: copied,
        error,
    }
}

fn relaunch(args: &ApplyArgs) {
    let Some(host_exe) = &args.host_exe else {
        return;
    };
    let exe = args.install_dir.join(host_exe);
    match Command::new(&exe)
        .current_dir(&args.install_dir)
        .detached()
        .spawn()
    {
        Ok(child) => info!("Relaunched {} as pid {}", exe.display(), child.id()),
        Err(error) => warn!("Failed to relaunch {}: {error}", exe.display()),
    }
}

fn finish(args: &ApplyArgs) {
    for dir in std::iter::once(&args.staging_dir).chain(&args.cleanup_roots) {
        remove_tree(dir);
    }
    info!("Update applied");
}

fn remove_tree(dir: &Path) {
    if !dir.exists() {
        return;
    }
    match std::fs::remove_dir_all(dir) {
        Ok(()) => info!("Removed {}", dir.display()),
        Err(error) => warn!("Failed to remove {}: {error}", dir.display()),
    }
}

fn record_failure(args: &ApplyArgs, result: &ApplyResult) {
    let failure = ApplyFailure {
        exit_code: i32::from(result.exit_code()),
        status: result.status.as_str().to_string(),
        error: result.error.as_ref().map(ToString::to_string),
        copied_count: result.copied_count,
        finished_at: Utc::now(),
    };
    if let Err(error) = failure.write(&args.staging_dir) {
        warn!("Failed to record apply failure: {error}");
    }
}
