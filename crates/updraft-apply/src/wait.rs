use std::time::{Duration, Instant};

use log::{debug, info};
use updraft_core::UpdateError;
use updraft_platform::process::is_alive;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Block until `pid` has exited or `timeout` elapses.
///
/// # Errors
/// Returns [`UpdateError::Timeout`] if the process is still alive at the
/// deadline.
pub fn wait_for_exit(pid: u32, timeout: Duration, poll: Duration) -> Result<(), UpdateError> {
    let started = Instant::now();
    let deadline = started + timeout;
    info!("Waiting up to {}s for process {pid} to exit", timeout.as_secs());

    loop {
        if !is_alive(pid) {
            debug!("Process {pid} exited after {:?}", started.elapsed());
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(UpdateError::Timeout {
                pid,
                seconds: timeout.as_secs(),
            });
        }
        std::thread::sleep(poll.min(deadline - now));
    }
}
