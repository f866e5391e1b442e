//! Process-group signalling and liveness probes.
//!
//! Apps are spawned in their own process group so a misbehaving app's
//! children die with it. On unix this is `setpgid` at spawn plus
//! `killpg` on stop; on Windows the group is emulated with
//! `CREATE_NEW_PROCESS_GROUP` at spawn and `taskkill /T` on stop.

use std::path::Path;

use tracing::debug;

use crate::error::RuntimeResult;

/// Name of the pid file inside an app directory.
pub const PID_FILE_NAME: &str = ".pid";

/// Send SIGTERM to the process group (graceful).
pub fn terminate_group(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(to_raw(pid)), Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM to process group failed");
        }
    }
    #[cfg(windows)]
    {
        taskkill(pid, false);
    }
}

/// Send SIGKILL to the process group (forceful).
pub fn kill_group(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(to_raw(pid)), Signal::SIGKILL) {
            debug!(pid, error = %e, "SIGKILL to process group failed");
        }
    }
    #[cfg(windows)]
    {
        taskkill(pid, true);
    }
}

/// Whether a process with this pid is still alive.
#[must_use]
pub fn probe_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // Signal 0: existence probe. EPERM means it exists but isn't ours.
        match kill(Pid::from_raw(to_raw(pid)), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
    #[cfg(windows)]
    {
        std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/NH"])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}

#[cfg(unix)]
#[allow(clippy::cast_possible_wrap)]
fn to_raw(pid: u32) -> i32 {
    pid as i32
}

#[cfg(windows)]
fn taskkill(pid: u32, force: bool) {
    let mut cmd = std::process::Command::new("taskkill");
    cmd.args(["/PID", &pid.to_string(), "/T"]);
    if force {
        cmd.arg("/F");
    }
    if let Err(e) = cmd.output() {
        debug!(pid, error = %e, "taskkill failed");
    }
}

/// Write the `.pid` file for an app directory.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written.
pub fn write_pid_file(app_dir: &Path, pid: u32) -> RuntimeResult<()> {
    std::fs::write(app_dir.join(PID_FILE_NAME), format!("{pid}\n"))?;
    Ok(())
}

/// Read the `.pid` file of an app directory, if present and parseable.
#[must_use]
pub fn read_pid_file(app_dir: &Path) -> Option<u32> {
    let text = std::fs::read_to_string(app_dir.join(PID_FILE_NAME)).ok()?;
    text.trim().parse().ok()
}

/// Remove the `.pid` file of an app directory.
pub fn remove_pid_file(app_dir: &Path) {
    let _ = std::fs::remove_file(app_dir.join(PID_FILE_NAME));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_file_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(read_pid_file(tmp.path()), None);

        write_pid_file(tmp.path(), 4242).unwrap();
        assert_eq!(read_pid_file(tmp.path()), Some(4242));

        remove_pid_file(tmp.path());
        assert_eq!(read_pid_file(tmp.path()), None);
    }

    #[test]
    fn test_pid_file_garbage_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(PID_FILE_NAME), "not a pid").unwrap();
        assert_eq!(read_pid_file(tmp.path()), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_alive_self() {
        assert!(probe_alive(std::process::id()));
        // A pid from the far end of the range is almost certainly free.
        assert!(!probe_alive(0x3FFF_FFF0));
    }
}
