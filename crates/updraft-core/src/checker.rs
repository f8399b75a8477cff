use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::error::{Result, UpdateError};
use crate::feed::{ReleaseAsset, ReleaseInfo, ReleaseSource};
use crate::installed::InstalledVersion;
use crate::state::UpdateState;
use crate::version::is_newer;

/// Where the update cycle currently stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CheckerPhase {
    #[default]
    Idle,
    Checking,
    NoUpdate,
    UpdateAvailable,
    Downloading,
    Staging,
    AwaitingApply,
}

impl CheckerPhase {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use CheckerPhase::{
            AwaitingApply, Checking, Downloading, Idle, NoUpdate, Staging, UpdateAvailable,
        };

        matches!(
            (self, next),
            (Idle, Checking)
                | (Checking, NoUpdate | UpdateAvailable | Idle)
                | (NoUpdate | UpdateAvailable | Downloading | Staging | AwaitingApply, Idle)
                | (UpdateAvailable, Downloading)
                | (Downloading, Staging)
                | (Staging, AwaitingApply)
        )
    }
}

impl fmt::Display for CheckerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::NoUpdate => "no update",
            Self::UpdateAvailable => "update available",
            Self::Downloading => "downloading",
            Self::Staging => "staging",
            Self::AwaitingApply => "awaiting apply",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NotDue { next_check: DateTime<Utc> },
    Busy(CheckerPhase),
}

/// A release the host may offer to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCandidate {
    pub installed_version: String,
    pub release: ReleaseInfo,
    pub asset: ReleaseAsset,
}

#[derive(Debug)]
pub enum CheckOutcome {
    Skipped(SkipReason),
    Coalesced,
    NoUpdate,
    UpdateAvailable(UpdateCandidate),
    Failed(UpdateError),
}

/// Resets the single-flight flag however the check ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Schedules and runs update checks against a [`ReleaseSource`].
pub struct UpdateChecker<S> {
    source: S,
    installed: InstalledVersion,
    phase: Mutex<CheckerPhase>,
    in_flight: AtomicBool,
    ran_once: AtomicBool,
}

impl<S: ReleaseSource> UpdateChecker<S> {
    pub fn new(source: S, installed: InstalledVersion) -> Self {
        Self {
            source,
            installed,
            phase: Mutex::new(CheckerPhase::Idle),
            in_flight: AtomicBool::new(false),
            ran_once: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn phase(&self) -> CheckerPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next`, rejecting transitions the cycle does not allow.
    ///
    /// # Errors
    /// Returns [`UpdateError::InvalidArgument`] for an illegal transition.
    pub fn transition(&self, next: CheckerPhase) -> Result<CheckerPhase> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if !phase.can_transition_to(next) {
            return Err(UpdateError::InvalidArgument(format!(
                "cannot move update cycle from {} to {next}",
                *phase
            )));
        }
        debug!("Update cycle: {} -> {next}", *phase);
        let previous = *phase;
        *phase = next;
        Ok(previous)
    }

    /// Like [`Self::transition`] for moves the cycle should always allow.
    /// A rejected move is logged and leaves the phase unchanged.
    pub fn advance(&self, next: CheckerPhase) {
        if let Err(error) = self.transition(next) {
            warn!("Update cycle out of step: {error}");
        }
    }

    /// Run a check if policy allows.
    ///
    /// The first call in a process always runs. Later calls run once
    /// `state.check_interval_hours` have passed since `state.last_check`.
    /// `last_check` only advances when the check succeeds.
    pub async fn check(&self, state: &mut UpdateState, now: DateTime<Utc>) -> CheckOutcome {
        if !state.enabled {
            return CheckOutcome::Skipped(SkipReason::Disabled);
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Update check already running, coalescing trigger");
            return CheckOutcome::Coalesced;
        }
        let _in_flight = InFlight(&self.in_flight);

        if self.ran_once.load(Ordering::Acquire) && !state.is_check_due(now) {
            let next_check = state.next_check_at().unwrap_or(now);
            return CheckOutcome::Skipped(SkipReason::NotDue { next_check });
        }

        if self.transition(CheckerPhase::Checking).is_err() {
            return CheckOutcome::Skipped(SkipReason::Busy(self.phase()));
        }
        self.ran_once.store(true, Ordering::Release);

        match self.find_candidate(state).await {
            Ok(Some(candidate)) => {
                state.mark_checked(now);
                self.advance(CheckerPhase::UpdateAvailable);
                info!(
                    "Update available: {} -> {}",
                    candidate.installed_version, candidate.release.version
                );
                CheckOutcome::UpdateAvailable(candidate)
            }
            Ok(None) => {
                state.mark_checked(now);
                self.advance(CheckerPhase::NoUpdate);
                self.advance(CheckerPhase::Idle);
                info!("No update available");
                CheckOutcome::NoUpdate
            }
            Err(error) => {
                self.advance(CheckerPhase::Idle);
                warn!("Update check failed: {error}");
                CheckOutcome::Failed(error)
            }
        }
    }

    async fn find_candidate(&self, state: &UpdateState) -> Result<Option<UpdateCandidate>> {
        let installed_version = self.installed.read()?;
        let asset_override = state.asset_name.as_deref();

        let Some(release) = self
            .source
            .fetch_latest(state.channel, asset_override)
            .await?
        else {
            return Ok(None);
        };

        if !is_newer(
            &installed_version,
            &release.version,
            release.is_prerelease,
            state.channel,
        ) {
            debug!(
                "Latest release {} is not newer than installed {installed_version}",
                release.version
            );
            return Ok(None);
        }

        let asset = release
            .select_asset(asset_override, self.source.default_asset_name())?
            .clone();
        Ok(Some(UpdateCandidate {
            installed_version,
            release,
            asset,
        }))
    }
}
