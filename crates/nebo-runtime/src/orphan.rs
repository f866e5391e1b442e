//! Orphan process cleanup.
//!
//! Two sweeps before a launch: kill whatever a stale `.pid` file points
//! at, and (on Linux) kill any process in the OS table still executing
//! the same binary path — leftovers from a host crash that never ran
//! stop.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::process::{kill_group, probe_alive, read_pid_file, remove_pid_file, terminate_group};

/// Grace period between SIGTERM and SIGKILL for stale processes.
const STALE_KILL_GRACE: Duration = Duration::from_millis(500);

/// Kill the process named by a pre-existing `.pid` file, if it is alive.
pub async fn cleanup_stale_pid(app_dir: &Path) {
    let Some(pid) = read_pid_file(app_dir) else {
        return;
    };
    if probe_alive(pid) {
        info!(pid, dir = %app_dir.display(), "Killing stale app process from .pid file");
        terminate_group(pid);
        tokio::time::sleep(STALE_KILL_GRACE).await;
        if probe_alive(pid) {
            kill_group(pid);
        }
    }
    remove_pid_file(app_dir);
}

/// Kill any process whose executable is `binary_path` and whose pid is
/// not our own. Linux-only (`/proc` scan); a no-op elsewhere, where the
/// `.pid` sweep is the only recourse.
pub fn kill_binary_orphans(binary_path: &Path) {
    #[cfg(target_os = "linux")]
    {
        let own_pid = std::process::id();
        let Ok(canonical) = binary_path.canonicalize() else {
            return;
        };
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return;
        };
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };
            if pid == own_pid {
                continue;
            }
            let exe = entry.path().join("exe");
            if let Ok(target) = std::fs::read_link(&exe)
                && target == canonical
            {
                warn!(pid, binary = %canonical.display(), "Killing orphan app process");
                terminate_group(pid);
                kill_group(pid);
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = binary_path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{write_pid_file, PID_FILE_NAME};

    #[tokio::test]
    async fn test_cleanup_removes_dead_pid_file() {
        let tmp = tempfile::tempdir().unwrap();
        // A pid that cannot be alive.
        write_pid_file(tmp.path(), 0x3FFF_FFF0).unwrap();
        cleanup_stale_pid(tmp.path()).await;
        assert!(!tmp.path().join(PID_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_cleanup_ignores_missing_pid_file() {
        let tmp = tempfile::tempdir().unwrap();
        cleanup_stale_pid(tmp.path()).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cleanup_kills_live_stale_process() {
        let tmp = tempfile::tempdir().unwrap();

        let mut child = tokio::process::Command::new("/bin/sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        write_pid_file(tmp.path(), pid).unwrap();

        cleanup_stale_pid(tmp.path()).await;

        // The stale process is gone and reaped here (this test owns it).
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("stale process was not killed")
            .unwrap();
        assert!(!status.success());
        assert!(!tmp.path().join(PID_FILE_NAME).exists());
    }
}
