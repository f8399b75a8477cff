use std::path::PathBuf;

use clap::Parser;

use crate::DEFAULT_WAIT_TIMEOUT_SECS;

/// Replace an installation with a staged update once its host has exited.
#[derive(Debug, Clone, Parser)]
#[command(name = "updraft-apply", version, about)]
pub struct ApplyArgs {
    /// Staging root prepared by the updater (contains manifest.json)
    #[arg(long, value_name = "DIR")]
    pub staging_dir: PathBuf,

    /// Installation directory to update
    #[arg(long, value_name = "DIR")]
    pub install_dir: PathBuf,

    /// Install-relative path that must never be touched (repeatable)
    #[arg(long = "preserve", value_name = "PATTERN")]
    pub preserve: Vec<String>,

    /// Process to wait for before copying
    #[arg(long, value_name = "PID")]
    pub wait_pid: Option<u32>,

    /// Give up if the process is still running after this many seconds
    #[arg(long, value_name = "SECONDS", default_value_t = DEFAULT_WAIT_TIMEOUT_SECS)]
    pub wait_timeout: u64,

    /// Relaunch the host after a successful update
    #[arg(long, requires = "host_exe")]
    pub restart: bool,

    /// Host executable, relative to the install directory
    #[arg(long, value_name = "RELATIVE PATH")]
    pub host_exe: Option<PathBuf>,

    /// Extra directory to delete after a successful update (repeatable)
    #[arg(long = "cleanup-root", value_name = "DIR")]
    pub cleanup_roots: Vec<PathBuf>,

    /// Log file, defaults to apply.log in the app data directory
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Delete installed files that the new release no longer ships
    #[arg(long)]
    pub delete_removed: bool,
}
