//! Host-facing facade running checks and staging in the background.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::checker::{CheckOutcome, CheckerPhase, UpdateCandidate, UpdateChecker};
use crate::error::UpdateError;
use crate::feed::ReleaseSource;
use crate::staging::{Stager, StagingManifest, UpdateProgress};
use crate::state::UpdateState;

/// Release notes longer than this are cut for the prompt.
pub const NOTES_EXCERPT_CHARS: usize = 800;

/// Notifications for the host UI.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    UpdateAvailable {
        version: String,
        notes_excerpt: String,
    },
    Progress {
        phase: CheckerPhase,
        fraction_done: f64,
        message: String,
    },
    Finished {
        ok: bool,
        message: String,
    },
}

/// Resets a single-flight flag when the owning task ends.
struct FlagGuard(Arc<AtomicBool>);

impl Drop for FlagGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Updater<S> {
    checker: Arc<UpdateChecker<S>>,
    stager: Stager,
    state: Arc<Mutex<UpdateState>>,
    state_path: PathBuf,
    events: mpsc::Sender<UpdateEvent>,
    candidate: Arc<Mutex<Option<UpdateCandidate>>>,
    staged: Arc<Mutex<Option<StagingManifest>>>,
    staging_in_flight: Arc<AtomicBool>,
    shutdown: CancellationToken,
    current_stage: Mutex<Option<CancellationToken>>,
}

impl<S: ReleaseSource + 'static> Updater<S> {
    /// Build the service, loading persisted state from `state_path`.
    pub fn new(
        checker: UpdateChecker<S>,
        stager: Stager,
        state_path: impl Into<PathBuf>,
        events: mpsc::Sender<UpdateEvent>,
    ) -> Self {
        let state_path = state_path.into();
        let state = UpdateState::load(&state_path);
        Self {
            checker: Arc::new(checker),
            stager,
            state: Arc::new(Mutex::new(state)),
            state_path,
            events,
            candidate: Arc::new(Mutex::new(None)),
            staged: Arc::new(Mutex::new(None)),
            staging_in_flight: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
            current_stage: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> UpdateState {
        lock(&self.state).clone()
    }

    #[must_use]
    pub fn phase(&self) -> CheckerPhase {
        self.checker.phase()
    }

    #[must_use]
    pub fn candidate(&self) -> Option<UpdateCandidate> {
        lock(&self.candidate).clone()
    }

    /// Manifest of the payload staged by the last successful
    /// [`Updater::accept`].
    #[must_use]
    pub fn staged(&self) -> Option<StagingManifest> {
        lock(&self.staged).clone()
    }

    /// Run a check on a background task.
    ///
    /// The outcome arrives on the event channel. Triggers that land while a
    /// check runs are dropped.
    pub fn trigger_check(&self) -> JoinHandle<()> {
        let checker = Arc::clone(&self.checker);
        let state = Arc::clone(&self.state);
        let state_path = self.state_path.clone();
        let candidate_slot = Arc::clone(&self.candidate);
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut snapshot = lock(&state).clone();
            let outcome = checker.check(&mut snapshot, Utc::now()).await;

            let event = match outcome {
                CheckOutcome::Skipped(reason) => {
                    debug!("Update check skipped: {reason:?}");
                    return;
                }
                CheckOutcome::Coalesced => return,
                CheckOutcome::NoUpdate => {
                    record_check(&state, &snapshot, &state_path);
                    UpdateEvent::Finished {
                        ok: true,
                        message: "Already up to date".to_string(),
                    }
                }
                CheckOutcome::UpdateAvailable(candidate) => {
                    record_check(&state, &snapshot, &state_path);
                    let event = UpdateEvent::UpdateAvailable {
                        version: candidate.release.version.clone(),
                        notes_excerpt: candidate.release.notes_excerpt(NOTES_EXCERPT_CHARS),
                    };
                    *lock(&candidate_slot) = Some(candidate);
                    event
                }
                CheckOutcome::Failed(error) => UpdateEvent::Finished {
                    ok: false,
                    message: format!("Update check failed: {error}"),
                },
            };
            let _ = events.send(event).await;
        })
    }

    /// The host declined the offered update.
    ///
    /// # Errors
    /// Returns [`UpdateError::InvalidArgument`] if no update is on offer.
    pub fn dismiss(&self) -> Result<(), UpdateError> {
        if self.checker.phase() != CheckerPhase::UpdateAvailable {
            return Err(UpdateError::InvalidArgument(
                "no update is on offer".to_string(),
            ));
        }
        self.checker.transition(CheckerPhase::Idle)?;
        lock(&self.candidate).take();
        Ok(())
    }

    /// Download and stage the offered update on a background task.
    ///
    /// Returns `None` when a staging run is already active.
    ///
    /// # Errors
    /// Returns [`UpdateError::InvalidArgument`] if no update is on offer.
    pub fn accept(&self) -> Result<Option<JoinHandle<()>>, UpdateError> {
        if self
            .staging_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Staging already running, ignoring accept");
            return Ok(None);
        }
        let guard = FlagGuard(Arc::clone(&self.staging_in_flight));

        let Some(candidate) = self.candidate() else {
            return Err(UpdateError::InvalidArgument(
                "no update is on offer".to_string(),
            ));
        };
        self.checker.transition(CheckerPhase::Downloading)?;

        let cancel = self.shutdown.child_token();
        *lock(&self.current_stage) = Some(cancel.clone());

        let checker = Arc::clone(&self.checker);
        let stager = self.stager.clone();
        let staged_slot = Arc::clone(&self.staged);
        let events = self.events.clone();

        Ok(Some(tokio::spawn(async move {
            let _guard = guard;
            let (progress_tx, progress_rx) = mpsc::channel(32);
            let forward = tokio::spawn(forward_progress(
                progress_rx,
                events.clone(),
                Arc::clone(&checker),
            ));

            let result = stager
                .prepare_staging(&candidate.release, &candidate.asset, &progress_tx, &cancel)
                .await;
            drop(progress_tx);
            let _ = forward.await;

            let event = match result {
                Ok(manifest) => {
                    if checker.phase() == CheckerPhase::Downloading {
                        checker.advance(CheckerPhase::Staging);
                    }
                    checker.advance(CheckerPhase::AwaitingApply);
                    info!("Update {} ready to apply", manifest.version);
                    let message = format!("Update {} is ready to install", manifest.version);
                    *lock(&staged_slot) = Some(manifest);
                    UpdateEvent::Finished { ok: true, message }
                }
                Err(UpdateError::Cancelled) => {
                    checker.advance(CheckerPhase::Idle);
                    info!("Update download cancelled");
                    UpdateEvent::Finished {
                        ok: false,
                        message: "Update cancelled".to_string(),
                    }
                }
                Err(error) => {
                    checker.advance(CheckerPhase::Idle);
                    error!("Staging update failed: {error}");
                    UpdateEvent::Finished {
                        ok: false,
                        message: format!("Update failed: {error}"),
                    }
                }
            };
            let _ = events.send(event).await;
        })))
    }

    /// Cancel the running download or extraction, if any.
    pub fn cancel(&self) {
        if let Some(token) = lock(&self.current_stage).take() {
            token.cancel();
        }
    }

    /// Cancel all background work for good.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

async fn forward_progress<S: ReleaseSource>(
    mut progress: mpsc::Receiver<UpdateProgress>,
    events: mpsc::Sender<UpdateEvent>,
    checker: Arc<UpdateChecker<S>>,
) {
    while let Some(update) = progress.recv().await {
        let event = match update {
            UpdateProgress::Downloading { downloaded, total } => UpdateEvent::Progress {
                phase: CheckerPhase::Downloading,
                fraction_done: fraction(downloaded, total),
                message: format!("Downloaded {downloaded} of {total} bytes"),
            },
            UpdateProgress::Verifying => {
                enter_staging(&checker);
                UpdateEvent::Progress {
                    phase: CheckerPhase::Staging,
                    fraction_done: 0.0,
                    message: "Verifying download".to_string(),
                }
            }
            UpdateProgress::Extracting { extracted, total } => {
                enter_staging(&checker);
                UpdateEvent::Progress {
                    phase: CheckerPhase::Staging,
                    fraction_done: fraction(extracted, total),
                    message: format!("Extracting files ({extracted}/{total})"),
                }
            }
            UpdateProgress::Staged => continue,
        };
        let _ = events.send(event).await;
    }
}

fn enter_staging<S: ReleaseSource>(checker: &UpdateChecker<S>) {
    if checker.phase() == CheckerPhase::Downloading {
        checker.advance(CheckerPhase::Staging);
    }
}

#[allow(clippy::cast_precision_loss)]
fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (done as f64 / total as f64).clamp(0.0, 1.0)
    }
}

fn record_check(state: &Mutex<UpdateState>, snapshot: &UpdateState, path: &std::path::Path) {
    let updated = {
        let mut state = lock(state);
        state.last_check = snapshot.last_check;
        state.clone()
    };
    if let Err(error) = updated.save(path) {
        warn!("Failed to persist update state: {error}");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
