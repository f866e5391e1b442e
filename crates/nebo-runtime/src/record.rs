//! The live process record for one app.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::{debug, info, warn};

use nebo_core::{AppId, Manifest};

use crate::clients::CapabilityClients;
use crate::logs::LogGuard;
use crate::process::{kill_group, probe_alive, remove_pid_file, terminate_group};
use crate::socket::remove_stale_socket;

/// Grace period between SIGTERM and SIGKILL on stop.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// How long stop waits for the reaper when the process was already gone.
const REAP_OBSERVE_TIMEOUT: Duration = Duration::from_secs(2);

/// State behind the record's lock: clients read under the read lock,
/// stop takes the write lock.
struct Shared {
    channel: Option<Channel>,
    clients: CapabilityClients,
    log_guard: Option<LogGuard>,
}

/// A running app process.
///
/// Created at launch, destroyed at stop. The dedicated reaper task owns
/// the `Child` and performs the only `wait`; every other path — stop
/// included — merely observes `wait_done`.
pub struct AppProcess {
    id: AppId,
    dir: PathBuf,
    manifest: Manifest,
    socket_path: PathBuf,
    pid: u32,
    sideloaded: bool,
    started_at: Instant,
    wait_done: CancellationToken,
    shared: RwLock<Shared>,
}

impl AppProcess {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: AppId,
        dir: PathBuf,
        manifest: Manifest,
        socket_path: PathBuf,
        pid: u32,
        sideloaded: bool,
        wait_done: CancellationToken,
        channel: Option<Channel>,
        clients: CapabilityClients,
        log_guard: Option<LogGuard>,
    ) -> Self {
        Self {
            id,
            dir,
            manifest,
            socket_path,
            pid,
            sideloaded,
            started_at: Instant::now(),
            wait_done,
            shared: RwLock::new(Shared {
                channel,
                clients,
                log_guard,
            }),
        }
    }

    /// The app's identifier.
    #[must_use]
    pub fn id(&self) -> &AppId {
        &self.id
    }

    /// The app's on-disk directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The manifest the process was launched with.
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The app's socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// OS process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether this app was sideloaded (symlinked dev app).
    #[must_use]
    pub fn sideloaded(&self) -> bool {
        self.sideloaded
    }

    /// How long the process has been up.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Whether the OS still reports the process alive.
    #[must_use]
    pub fn os_alive(&self) -> bool {
        !self.wait_done.is_cancelled() && probe_alive(self.pid)
    }

    /// Clone the typed client handles (cheap: channel clones).
    pub async fn clients(&self) -> CapabilityClients {
        self.shared.read().await.clients.clone()
    }

    /// Stop the process.
    ///
    /// Closes the gRPC connection, SIGTERMs the process group, races the
    /// reaper's `wait_done` against a 2-second grace, SIGKILLs on
    /// timeout, then cleans up logs, socket, and pid file. Never waits on
    /// the process directly — only the reaper does that.
    pub async fn stop(&self) {
        debug!(app_id = %self.id, pid = self.pid, "Stopping app process");

        let mut log_guard = {
            let mut shared = self.shared.write().await;
            shared.channel = None;
            shared.clients = CapabilityClients::default();
            shared.log_guard.take()
        };

        if probe_alive(self.pid) {
            terminate_group(self.pid);
            let graceful = tokio::time::timeout(STOP_GRACE, self.wait_done.cancelled())
                .await
                .is_ok();
            if !graceful {
                warn!(app_id = %self.id, pid = self.pid, "Graceful stop timed out, killing process group");
                kill_group(self.pid);
                self.wait_done.cancelled().await;
            }
        } else if tokio::time::timeout(REAP_OBSERVE_TIMEOUT, self.wait_done.cancelled())
            .await
            .is_err()
        {
            warn!(app_id = %self.id, pid = self.pid, "Reaper did not confirm exit of dead process");
        }

        if let Some(guard) = log_guard.as_mut() {
            guard.cleanup();
        }
        remove_stale_socket(&self.socket_path);
        remove_pid_file(&self.dir);
        info!(app_id = %self.id, pid = self.pid, "App process stopped");
    }
}

impl std::fmt::Debug for AppProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppProcess")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("dir", &self.dir)
            .field("sideloaded", &self.sideloaded)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::process::{write_pid_file, PID_FILE_NAME};

    /// Spawn /bin/sleep in its own group with a reaper task, mirroring
    /// what the runtime's launch does.
    async fn spawn_sleeper(dir: &Path) -> (AppProcess, tokio::task::JoinHandle<()>) {
        let mut child = tokio::process::Command::new("/bin/sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        write_pid_file(dir, pid).unwrap();

        let wait_done = CancellationToken::new();
        let reaper = {
            let wait_done = wait_done.clone();
            tokio::spawn(async move {
                let _ = child.wait().await;
                wait_done.cancel();
            })
        };

        let manifest = Manifest::from_slice(
            &serde_json::to_vec(&serde_json::json!({
                "id": "com.example.sleeper",
                "name": "Sleeper",
                "version": "1.0.0"
            }))
            .unwrap(),
        )
        .unwrap();

        let record = AppProcess::new(
            AppId::from_static("com.example.sleeper"),
            dir.to_path_buf(),
            manifest,
            dir.join("app.sock"),
            pid,
            false,
            wait_done,
            None,
            CapabilityClients::default(),
            None,
        );
        (record, reaper)
    }

    #[tokio::test]
    async fn test_stop_terminates_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let (record, reaper) = spawn_sleeper(tmp.path()).await;
        assert!(record.os_alive());

        record.stop().await;

        assert!(!record.os_alive());
        assert!(!tmp.path().join(PID_FILE_NAME).exists());
        // The reaper performed the only wait and has finished.
        reaper.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_observes_reaper_for_dead_process() {
        let tmp = tempfile::tempdir().unwrap();
        let (record, reaper) = spawn_sleeper(tmp.path()).await;

        // Kill outside of stop; the reaper notices.
        crate::process::kill_group(record.pid());
        reaper.await.unwrap();
        assert!(!record.os_alive());

        // Stop on an already-dead process is clean and quick.
        record.stop().await;
        assert!(!tmp.path().join(PID_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let (record, _reaper) = spawn_sleeper(tmp.path()).await;
        record.stop().await;
        record.stop().await;
    }
}
