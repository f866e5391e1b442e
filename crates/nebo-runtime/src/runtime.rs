//! The app runtime: launch, stop, and the process table.
//!
//! All launches of one app are serialized by that app's launch mutex —
//! the sole invariant preventing duplicate processes when the
//! supervisor, the filesystem watcher, and the install pipeline race on
//! the same id. Different apps launch in parallel.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use nebo_core::{AppId, Manifest, PlatformConfig};
use nebo_crypto::{PackageVerifier, RevocationCheck};
use nebo_inspect::Inspector;
use nebo_package::{locate_binary, validate_binary};

use crate::clients::CapabilityClients;
use crate::env::sandbox_env;
use crate::error::{RuntimeError, RuntimeResult};
use crate::health;
use crate::logs::{spawn_tee, LogGuard, LogWriter};
use crate::orphan::{cleanup_stale_pid, kill_binary_orphans};
use crate::process::{kill_group, remove_pid_file, write_pid_file};
use crate::record::AppProcess;
use crate::socket::{remove_stale_socket, restrict_socket, wait_for_socket, SOCKET_FILE_NAME};

/// The process launcher and table.
pub struct AppRuntime {
    config: Arc<PlatformConfig>,
    verifier: Option<Arc<PackageVerifier>>,
    revocations: Option<Arc<dyn RevocationCheck>>,
    inspector: Option<Arc<Inspector>>,
    processes: RwLock<HashMap<AppId, Arc<AppProcess>>>,
    launch_locks: DashMap<AppId, Arc<Mutex<()>>>,
    /// Watcher suppression: app id → expiry. While set, the filesystem
    /// watcher skips restarts for that app (a managed restart is already
    /// in progress).
    suppressions: DashMap<AppId, Instant>,
}

impl AppRuntime {
    /// Create a runtime.
    ///
    /// `verifier` is `None` only in tests and key-less dev setups;
    /// `revocations` is optional the same way.
    #[must_use]
    pub fn new(
        config: Arc<PlatformConfig>,
        verifier: Option<Arc<PackageVerifier>>,
        revocations: Option<Arc<dyn RevocationCheck>>,
        inspector: Option<Arc<Inspector>>,
    ) -> Self {
        Self {
            config,
            verifier,
            revocations,
            inspector,
            processes: RwLock::new(HashMap::new()),
            launch_locks: DashMap::new(),
            suppressions: DashMap::new(),
        }
    }

    /// The platform configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<PlatformConfig> {
        &self.config
    }

    /// The revocation checker, if configured.
    #[must_use]
    pub fn revocations(&self) -> Option<&Arc<dyn RevocationCheck>> {
        self.revocations.as_ref()
    }

    /// The inspector, if configured.
    #[must_use]
    pub fn inspector(&self) -> Option<&Arc<Inspector>> {
        self.inspector.as_ref()
    }

    fn launch_lock(&self, id: &AppId) -> Arc<Mutex<()>> {
        self.launch_locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Launch the app installed at `app_dir` and publish its record.
    ///
    /// If a prior record exists for the id, the old record is stopped
    /// asynchronously before the new one is inserted.
    ///
    /// # Errors
    ///
    /// Any failing step of the launch sequence; see [`RuntimeError`].
    pub async fn launch(&self, app_dir: &Path) -> RuntimeResult<Arc<AppProcess>> {
        let manifest = Manifest::load(app_dir)?;
        let id = manifest.id.clone();

        let lock = self.launch_lock(&id);
        let _guard = lock.lock().await;

        // Sideloaded dev apps are symlinks into a project directory and
        // bypass signature verification.
        let sideloaded = std::fs::symlink_metadata(app_dir)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        let binary = locate_binary(app_dir)?;

        if let Some(revocations) = &self.revocations {
            match revocations.is_revoked(&id).await {
                Ok(true) => return Err(RuntimeError::Revoked(id)),
                Ok(false) => {},
                Err(e) => {
                    warn!(app_id = %id, error = %e, "Revocation check unavailable, continuing");
                },
            }
        }

        if !sideloaded
            && let Some(verifier) = &self.verifier
        {
            verifier.verify_dir(app_dir, &binary).await?;
        }

        validate_binary(&binary, self.config.binary_size_limit)?;

        cleanup_stale_pid(app_dir).await;
        kill_binary_orphans(&binary);

        let socket_path = app_dir.join(SOCKET_FILE_NAME);
        remove_stale_socket(&socket_path);
        let data_dir = self.config.app_data_dir(&id);
        std::fs::create_dir_all(&data_dir)?;

        // Open log files before spawning so a failure here leaks nothing.
        let log_writers = if self.config.tee_logs {
            Some((
                LogWriter::open(app_dir.join("logs").join("stdout.log"))?,
                LogWriter::open(app_dir.join("logs").join("stderr.log"))?,
            ))
        } else {
            None
        };

        let env = sandbox_env(&manifest, app_dir, &socket_path, &data_dir);
        let mut command = tokio::process::Command::new(&binary);
        command
            .current_dir(app_dir)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null());
        if self.config.tee_logs {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        #[cfg(unix)]
        command.process_group(0);
        #[cfg(windows)]
        command.creation_flags(0x0000_0200); // CREATE_NEW_PROCESS_GROUP

        let mut child = command.spawn().map_err(|e| RuntimeError::SpawnFailed {
            app_id: id.clone(),
            message: e.to_string(),
        })?;
        let pid = child.id().ok_or_else(|| RuntimeError::SpawnFailed {
            app_id: id.clone(),
            message: "process exited before startup".into(),
        })?;

        if let Err(e) = write_pid_file(app_dir, pid) {
            // No reaper exists yet, so kill-and-wait is ours to do.
            kill_group(pid);
            let _ = child.kill().await;
            return Err(e);
        }

        let log_guard = log_writers.map(|(stdout_writer, stderr_writer)| {
            let mut tasks = Vec::new();
            if let Some(stdout) = child.stdout.take() {
                tasks.push(spawn_tee(id.clone(), "stdout", stdout, stdout_writer));
            }
            if let Some(stderr) = child.stderr.take() {
                tasks.push(spawn_tee(id.clone(), "stderr", stderr, stderr_writer));
            }
            LogGuard::new(tasks)
        });

        // The reaper: the only code path that ever waits on this child.
        let wait_done = CancellationToken::new();
        {
            let wait_done = wait_done.clone();
            let reaper_id = id.clone();
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) => {
                        debug!(app_id = %reaper_id, %status, "App process exited");
                    },
                    Err(e) => warn!(app_id = %reaper_id, error = %e, "Reaper wait failed"),
                }
                wait_done.cancel();
            });
        }

        let startup_timeout = manifest.startup_timeout();
        if let Err(waited) = wait_for_socket(&socket_path, startup_timeout).await {
            error!(app_id = %id, ?waited, "App socket never became ready");
            abort_launch(app_dir, &socket_path, pid, &wait_done).await;
            drop(log_guard);
            return Err(RuntimeError::StartupTimeout { app_id: id, waited });
        }
        if let Err(e) = restrict_socket(&socket_path) {
            abort_launch(app_dir, &socket_path, pid, &wait_done).await;
            drop(log_guard);
            return Err(e);
        }

        let channel = match dial(&socket_path).await {
            Ok(channel) => channel,
            Err(message) => {
                abort_launch(app_dir, &socket_path, pid, &wait_done).await;
                drop(log_guard);
                return Err(RuntimeError::ConnectFailed {
                    app_id: id,
                    message,
                });
            },
        };

        let clients = CapabilityClients::from_manifest(&channel, &manifest);

        if let Err(e) = health::check(&id, &clients, self.inspector.as_ref()).await {
            error!(app_id = %id, error = %e, "Launch-time health check failed");
            abort_launch(app_dir, &socket_path, pid, &wait_done).await;
            drop(log_guard);
            return Err(e);
        }

        let record = Arc::new(AppProcess::new(
            id.clone(),
            app_dir.to_path_buf(),
            manifest,
            socket_path,
            pid,
            sideloaded,
            wait_done,
            Some(channel),
            clients,
            log_guard,
        ));

        {
            let mut table = self.processes.write().await;
            if let Some(old) = table.remove(&id) {
                warn!(app_id = %id, old_pid = old.pid(), "Stopping replaced process record");
                tokio::spawn(async move { old.stop().await });
            }
            table.insert(id.clone(), Arc::clone(&record));
        }

        info!(app_id = %id, pid, "Launched app");
        Ok(record)
    }

    /// Relaunch an app from its directory under the apps root.
    ///
    /// # Errors
    ///
    /// Same as [`launch`](Self::launch).
    pub async fn relaunch(&self, id: &AppId) -> RuntimeResult<Arc<AppProcess>> {
        let dir = self.config.app_dir(id);
        self.launch(&dir).await
    }

    /// Stop an app and remove its record.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NotRunning`] if no record exists.
    pub async fn stop(&self, id: &AppId) -> RuntimeResult<()> {
        let record = {
            let mut table = self.processes.write().await;
            table.remove(id)
        };
        match record {
            Some(record) => {
                record.stop().await;
                Ok(())
            },
            None => Err(RuntimeError::NotRunning(id.clone())),
        }
    }

    /// Stop every live app (host shutdown).
    pub async fn stop_all(&self) {
        let records: Vec<Arc<AppProcess>> = {
            let mut table = self.processes.write().await;
            table.drain().map(|(_, record)| record).collect()
        };
        futures::future::join_all(records.iter().map(|record| record.stop())).await;
    }

    /// The record for an app, if live.
    pub async fn get(&self, id: &AppId) -> Option<Arc<AppProcess>> {
        self.processes.read().await.get(id).cloned()
    }

    /// All live records.
    pub async fn list(&self) -> Vec<Arc<AppProcess>> {
        self.processes.read().await.values().cloned().collect()
    }

    /// All live app ids.
    pub async fn live_ids(&self) -> Vec<AppId> {
        self.processes.read().await.keys().cloned().collect()
    }

    /// Run a health check against a live app.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NotRunning`] if no record exists, otherwise the
    /// health failure kind.
    pub async fn health_check(&self, id: &AppId) -> RuntimeResult<()> {
        let record = self
            .get(id)
            .await
            .ok_or_else(|| RuntimeError::NotRunning(id.clone()))?;
        let clients = record.clients().await;
        health::check(id, &clients, self.inspector.as_ref()).await
    }

    /// Mark the app as watcher-suppressed for `duration`.
    pub fn suppress_watcher(&self, id: &AppId, duration: Duration) {
        #[allow(clippy::arithmetic_side_effects)]
        let expiry = Instant::now() + duration;
        self.suppressions.insert(id.clone(), expiry);
    }

    /// Clear the app's watcher suppression.
    pub fn clear_watcher_suppression(&self, id: &AppId) {
        self.suppressions.remove(id);
    }

    /// Whether the watcher should skip this app right now.
    #[must_use]
    pub fn is_watcher_suppressed(&self, id: &AppId) -> bool {
        if let Some(entry) = self.suppressions.get(id) {
            if *entry.value() > Instant::now() {
                return true;
            }
            drop(entry);
            self.suppressions.remove(id);
        }
        false
    }
}

impl std::fmt::Debug for AppRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRuntime").finish_non_exhaustive()
    }
}

async fn dial(socket_path: &Path) -> Result<tonic::transport::Channel, String> {
    #[cfg(unix)]
    {
        nebo_proto::uds::connect(socket_path)
            .await
            .map_err(|e| e.to_string())
    }
    #[cfg(not(unix))]
    {
        let _ = socket_path;
        Err("unix-domain sockets are not supported on this platform".into())
    }
}

async fn abort_launch(
    app_dir: &Path,
    socket_path: &Path,
    pid: u32,
    wait_done: &CancellationToken,
) {
    kill_group(pid);
    let _ = tokio::time::timeout(Duration::from_secs(2), wait_done.cancelled()).await;
    remove_stale_socket(socket_path);
    remove_pid_file(app_dir);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn test_config(apps_dir: &Path, data_dir: &Path) -> Arc<PlatformConfig> {
        let mut config = PlatformConfig::new(apps_dir, data_dir);
        config.tee_logs = false;
        Arc::new(config)
    }

    fn runtime(apps_dir: &Path, data_dir: &Path) -> AppRuntime {
        AppRuntime::new(test_config(apps_dir, data_dir), None, None, None)
    }

    fn write_manifest(dir: &Path, id: &str, timeout_secs: u64) {
        let manifest = serde_json::json!({
            "id": id,
            "name": "Test App",
            "version": "1.0.0",
            "startup_timeout_secs": timeout_secs,
            "capabilities": ["tool:noop"],
            "permissions": []
        });
        std::fs::write(
            dir.join("manifest.json"),
            serde_json::to_vec_pretty(&manifest).unwrap(),
        )
        .unwrap();
    }

    /// Install /bin/sleep as the app "binary": a real ELF executable that
    /// will never open a socket.
    fn install_sleep_binary(dir: &Path) {
        std::fs::copy("/bin/sleep", dir.join("binary")).unwrap();
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::set_permissions(dir.join("binary"), std::fs::Permissions::from_mode(0o700))
            .unwrap();
    }

    #[tokio::test]
    async fn test_launch_missing_manifest_fails() {
        let apps = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let rt = runtime(apps.path(), data.path());
        let app_dir = apps.path().join("com.example.none");
        std::fs::create_dir(&app_dir).unwrap();
        assert!(rt.launch(&app_dir).await.is_err());
    }

    #[tokio::test]
    async fn test_launch_script_binary_rejected() {
        let apps = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let rt = runtime(apps.path(), data.path());
        let app_dir = apps.path().join("com.example.script");
        std::fs::create_dir(&app_dir).unwrap();
        write_manifest(&app_dir, "com.example.script", 1);
        std::fs::write(app_dir.join("binary"), "#!/bin/sh\nexit 0\n").unwrap();
        use std::os::unix::fs::PermissionsExt as _;
        std::fs::set_permissions(app_dir.join("binary"), std::fs::Permissions::from_mode(0o700))
            .unwrap();

        let err = rt.launch(&app_dir).await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Package(nebo_package::PackageError::BinaryIsScript(_))
        ));
    }

    #[tokio::test]
    async fn test_launch_startup_timeout_kills_process() {
        let apps = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let rt = runtime(apps.path(), data.path());
        let app_dir = apps.path().join("com.example.slow");
        std::fs::create_dir(&app_dir).unwrap();
        write_manifest(&app_dir, "com.example.slow", 1);
        install_sleep_binary(&app_dir);

        let err = rt.launch(&app_dir).await.unwrap_err();
        assert!(matches!(err, RuntimeError::StartupTimeout { .. }));
        // No record was published, no pid file remains.
        assert!(rt.get(&AppId::from_static("com.example.slow")).await.is_none());
        assert!(!app_dir.join(".pid").exists());
    }

    struct AlwaysRevoked;

    #[async_trait::async_trait]
    impl RevocationCheck for AlwaysRevoked {
        async fn is_revoked(&self, _id: &AppId) -> nebo_crypto::CryptoResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_launch_revoked_refused() {
        let apps = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let rt = AppRuntime::new(
            test_config(apps.path(), data.path()),
            None,
            Some(Arc::new(AlwaysRevoked)),
            None,
        );
        let app_dir = apps.path().join("com.example.banned");
        std::fs::create_dir(&app_dir).unwrap();
        write_manifest(&app_dir, "com.example.banned", 1);
        install_sleep_binary(&app_dir);

        let err = rt.launch(&app_dir).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Revoked(_)));
    }

    #[tokio::test]
    async fn test_suppression_expires() {
        let apps = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let rt = runtime(apps.path(), data.path());
        let id = AppId::from_static("com.example.a");

        assert!(!rt.is_watcher_suppressed(&id));
        rt.suppress_watcher(&id, Duration::from_millis(50));
        assert!(rt.is_watcher_suppressed(&id));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!rt.is_watcher_suppressed(&id));

        rt.suppress_watcher(&id, Duration::from_secs(30));
        rt.clear_watcher_suppression(&id);
        assert!(!rt.is_watcher_suppressed(&id));
    }

    #[tokio::test]
    async fn test_stop_unknown_app() {
        let apps = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let rt = runtime(apps.path(), data.path());
        let err = rt.stop(&AppId::from_static("com.example.ghost")).await;
        assert!(matches!(err, Err(RuntimeError::NotRunning(_))));
    }
}
