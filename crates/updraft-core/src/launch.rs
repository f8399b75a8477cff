use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::info;
use updraft_platform::DetachExt;

use crate::error::{Result, UpdateError};
use crate::preserve::PreservedPathSet;

pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 900;

/// Everything the applier process needs, rendered as its command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest {
    pub applier_exe: PathBuf,
    pub staging_dir: PathBuf,
    pub install_dir: PathBuf,
    pub preserved: PreservedPathSet,
    pub wait_pid: u32,
    pub wait_timeout_secs: u64,
    pub restart: bool,
    /// Host executable relative to `install_dir`, relaunched when `restart`
    /// is set.
    pub host_exe: Option<PathBuf>,
    pub cleanup_roots: Vec<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub delete_removed: bool,
}

impl ApplyRequest {
    /// A request that waits for the current process and preserves the host
    /// defaults.
    #[must_use]
    pub fn new(
        applier_exe: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        install_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            applier_exe: applier_exe.into(),
            staging_dir: staging_dir.into(),
            install_dir: install_dir.into(),
            preserved: PreservedPathSet::host_defaults(),
            wait_pid: std::process::id(),
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
            restart: false,
            host_exe: None,
            cleanup_roots: Vec::new(),
            log_file: None,
            delete_removed: false,
        }
    }

    #[must_use]
    pub fn with_restart(mut self, host_exe: impl Into<PathBuf>) -> Self {
        self.restart = true;
        self.host_exe = Some(host_exe.into());
        self
    }

    #[must_use]
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--staging-dir".into(),
            self.staging_dir.clone().into(),
            "--install-dir".into(),
            self.install_dir.clone().into(),
            "--wait-pid".into(),
            self.wait_pid.to_string().into(),
            "--wait-timeout".into(),
            self.wait_timeout_secs.to_string().into(),
        ];
        for pattern in self.preserved.patterns() {
            args.push("--preserve".into());
            args.push(pattern.into());
        }
        if self.restart {
            args.push("--restart".into());
        }
        if let Some(host_exe) = &self.host_exe {
            args.push("--host-exe".into());
            args.push(host_exe.clone().into());
        }
        for root in &self.cleanup_roots {
            args.push("--cleanup-root".into());
            args.push(root.clone().into());
        }
        if let Some(log_file) = &self.log_file {
            args.push("--log-file".into());
            args.push(log_file.clone().into());
        }
        if self.delete_removed {
            args.push("--delete-removed".into());
        }
        args
    }
}

/// Start the applier detached from this process and return its pid.
///
/// The applier binary is copied to a fresh temporary directory first so the
/// install directory it lives in can be overwritten. That directory is handed
/// to the applier as a cleanup root.
///
/// # Errors
/// Returns [`UpdateError::InvalidArgument`] if the applier executable is
/// missing, or [`UpdateError::Filesystem`] if copying or spawning fails.
pub fn spawn_applier(request: &ApplyRequest) -> Result<u32> {
    let file_name = request
        .applier_exe
        .file_name()
        .filter(|_| request.applier_exe.is_file())
        .ok_or_else(|| {
            UpdateError::InvalidArgument(format!(
                "applier executable {} does not exist",
                request.applier_exe.display()
            ))
        })?;

    let relocated_dir = tempfile::Builder::new()
        .prefix("updraft-apply-")
        .tempdir()
        .map_err(|error| UpdateError::io("failed to create applier directory", error))?;
    let relocated_exe = relocated_dir.path().join(file_name);
    copy_executable(&request.applier_exe, &relocated_exe)?;

    let mut request = request.clone();
    request.cleanup_roots.push(relocated_dir.path().to_path_buf());

    let child = Command::new(&relocated_exe)
        .args(request.to_args())
        .current_dir(relocated_dir.path())
        .detached()
        .spawn()
        .map_err(|error| {
            UpdateError::io_with_path("failed to launch applier", &relocated_exe, &error)
        })?;
    let _ = relocated_dir.keep();

    info!(
        "Launched applier pid {} for {}",
        child.id(),
        request.install_dir.display()
    );
    Ok(child.id())
}

fn copy_executable(from: &Path, to: &Path) -> Result<()> {
    std::fs::copy(from, to).map_err(|error| {
        UpdateError::io_with_path("failed to copy applier executable", from, &error)
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(to, std::fs::Permissions::from_mode(0o755)).map_err(|error| {
            UpdateError::io_with_path("failed to mark applier executable", to, &error)
        })?;
    }
    Ok(())
}
