//! Process liveness checks.

/// Returns `true` while a process with `pid` exists.
///
/// A process we are not permitted to inspect is reported as alive: the caller
/// is waiting for it to go away, and an access error proves it has not.
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    imp::is_alive(pid)
}

#[cfg(unix)]
mod imp {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    pub(super) fn is_alive(pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => {
                log::debug!("No permission to signal process {pid}, treating it as running");
                true
            }
            Err(Errno::ESRCH) => false,
            Err(error) => {
                log::warn!("Checking process {pid} failed: {error}");
                false
            }
        }
    }
}

#[cfg(windows)]
mod imp {
    use windows_sys::Win32::Foundation::{CloseHandle, ERROR_ACCESS_DENIED, GetLastError};
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    const STILL_ACTIVE: u32 = 259;

    pub(super) fn is_alive(pid: u32) -> bool {
        // SAFETY: `OpenProcess` is called with a plain pid and no inherited
        // handle; the returned handle is null-checked and closed before
        // returning.
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                let denied = GetLastError() == ERROR_ACCESS_DENIED;
                if denied {
                    log::debug!("Access to process {pid} denied, treating it as running");
                }
                return denied;
            }

            let mut exit_code: u32 = 0;
            let queried = GetExitCodeProcess(handle, &raw mut exit_code);
            CloseHandle(handle);

            queried != 0 && exit_code == STILL_ACTIVE
        }
    }
}
