use std::process::{Command, Stdio};

#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;
#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Detach a command from the spawning process so it survives the spawner's
/// exit and does not share its console or signals.
pub trait DetachExt {
    fn detached(&mut self) -> &mut Self;
}

impl DetachExt for Command {
    fn detached(&mut self) -> &mut Self {
        self.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            self.process_group(0);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        self
    }
}
