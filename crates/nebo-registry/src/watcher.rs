//! Filesystem watcher for the apps directory.
//!
//! Watches the apps directory and its live subdirectories, coalescing
//! events with a per-app debounce timer. A fired timer stops and
//! relaunches the app — unless the supervisor has suppressed the
//! watcher for that app (a managed restart is already in progress).
//!
//! ```text
//! filesystem events (notify)
//!   → filter runtime artifacts (app.sock, .pid, logs/, data/)
//!   → map to the top-level app entry
//!   → debounce 500ms per app
//!   → suppressed? skip : stop + relaunch (or first launch / stop)
//! ```

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nebo_core::AppId;
use nebo_runtime::AppRuntime;

use crate::error::{RegistryError, RegistryResult};
use crate::registry::{AppRegistry, QUARANTINE_MARKER};

/// File names the platform itself writes; changes to them must not
/// trigger restarts.
const IGNORED_FILES: &[&str] = &["app.sock", ".pid", ".quarantined"];

/// Directory names inside an app dir that change at runtime.
const IGNORED_DIRS: &[&str] = &["logs", "data", "tmp"];

/// Watches the apps directory and drives registry restarts.
pub struct AppWatcher {
    registry: Arc<AppRegistry>,
    runtime: Arc<AppRuntime>,
    debounce: Duration,
    watcher: RecommendedWatcher,
    raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl AppWatcher {
    /// Create a watcher over the registry's apps directory.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Watch`] if the backend cannot start.
    pub fn new(registry: Arc<AppRegistry>) -> RegistryResult<Self> {
        let runtime = Arc::clone(registry.runtime());
        let debounce = registry.config().watch_debounce();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let watcher = RecommendedWatcher::new(
            move |result| {
                let _ = raw_tx.send(result);
            },
            notify::Config::default(),
        )
        .map_err(|e| RegistryError::Watch(e.to_string()))?;
        Ok(Self {
            registry,
            runtime,
            debounce,
            watcher,
            raw_rx,
        })
    }

    /// Run the watch loop until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        let apps_dir = self.registry.config().apps_dir.clone();
        match self.watcher.watch(&apps_dir, RecursiveMode::Recursive) {
            Ok(()) => info!(dir = %apps_dir.display(), "Watching apps directory"),
            Err(e) => {
                warn!(dir = %apps_dir.display(), error = %e, "Cannot watch apps directory");
                return;
            },
        }

        let mut pending: HashMap<AppId, Instant> = HashMap::new();
        loop {
            let next_deadline = pending.values().copied().min();

            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                // Fire debounced restarts first.
                () = async {
                    match next_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let now = Instant::now();
                    let ready: Vec<AppId> = pending
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(id, _)| id.clone())
                        .collect();
                    for id in ready {
                        pending.remove(&id);
                        self.handle_change(&id).await;
                    }
                }

                event = self.raw_rx.recv() => {
                    match event {
                        Some(Ok(event)) => self.enqueue(&apps_dir, &event, &mut pending),
                        Some(Err(e)) => warn!(error = %e, "Filesystem watcher error"),
                        None => {
                            debug!("Watcher channel closed, stopping");
                            break;
                        },
                    }
                }
            }
        }
    }

    /// Map a raw event to app entries and reset their debounce timers.
    fn enqueue(&self, apps_dir: &Path, event: &Event, pending: &mut HashMap<AppId, Instant>) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {},
            _ => return,
        }
        for path in &event.paths {
            let Some(id) = resolve_app_entry(apps_dir, path) else {
                continue;
            };
            debug!(app_id = %id, path = %path.display(), kind = ?event.kind, "App file change detected");
            #[allow(clippy::arithmetic_side_effects)]
            let deadline = Instant::now() + self.debounce;
            pending.insert(id, deadline);
        }
    }

    /// Apply the debounced change for one app.
    async fn handle_change(&self, id: &AppId) {
        if self.runtime.is_watcher_suppressed(id) {
            debug!(app_id = %id, "Watcher suppressed, skipping managed-restart echo");
            return;
        }

        let dir = self.registry.config().app_dir(id);
        let running = self.runtime.get(id).await.is_some();

        if !dir.is_dir() {
            // Top-level entry removed: stop the app.
            if running {
                info!(app_id = %id, "App directory removed, stopping");
                if let Err(e) = self.registry.stop_app(id).await {
                    warn!(app_id = %id, error = %e, "Stop after removal failed");
                }
            }
            return;
        }
        if dir.join(QUARANTINE_MARKER).exists() {
            return;
        }
        if !dir.join("manifest.json").is_file() {
            return;
        }

        if running {
            info!(app_id = %id, "App files changed, restarting");
            if let Err(e) = self.registry.relaunch(id).await {
                warn!(app_id = %id, error = %e, "Watcher-driven restart failed");
            }
        } else {
            info!(app_id = %id, "New app appeared, launching");
            if let Err(e) = self.registry.launch_and_register(&dir).await {
                warn!(app_id = %id, error = %e, "Watcher-driven launch failed");
            }
        }
    }
}

impl std::fmt::Debug for AppWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppWatcher")
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

/// Map a changed path to the app entry it belongs to.
///
/// Returns `None` for paths outside the apps directory, transient
/// staging directories, and runtime artifacts the platform writes
/// itself.
fn resolve_app_entry(apps_dir: &Path, path: &Path) -> Option<AppId> {
    let relative = path.strip_prefix(apps_dir).ok()?;
    let mut components = relative.components();
    let Component::Normal(entry) = components.next()? else {
        return None;
    };
    let entry = entry.to_str()?;
    if entry.starts_with('.') || entry.ends_with(".updating") || entry.ends_with(".pending") {
        return None;
    }

    // Inspect the rest of the path for runtime artifacts.
    if let Some(Component::Normal(child)) = components.next() {
        let child = child.to_str()?;
        if IGNORED_FILES.contains(&child) || IGNORED_DIRS.contains(&child) {
            return None;
        }
    } else if IGNORED_FILES.contains(&entry) {
        return None;
    }

    AppId::new(entry).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_binary_change() {
        let apps = Path::new("/srv/apps");
        let id = resolve_app_entry(apps, Path::new("/srv/apps/com.example.a/binary")).unwrap();
        assert_eq!(id.as_str(), "com.example.a");
    }

    #[test]
    fn test_resolve_manifest_create() {
        let apps = Path::new("/srv/apps");
        let id =
            resolve_app_entry(apps, Path::new("/srv/apps/com.example.a/manifest.json")).unwrap();
        assert_eq!(id.as_str(), "com.example.a");
    }

    #[test]
    fn test_resolve_top_level_entry() {
        let apps = Path::new("/srv/apps");
        let id = resolve_app_entry(apps, Path::new("/srv/apps/com.example.a")).unwrap();
        assert_eq!(id.as_str(), "com.example.a");
    }

    #[test]
    fn test_ignores_runtime_artifacts() {
        let apps = Path::new("/srv/apps");
        for path in [
            "/srv/apps/com.example.a/app.sock",
            "/srv/apps/com.example.a/.pid",
            "/srv/apps/com.example.a/.quarantined",
            "/srv/apps/com.example.a/logs/stdout.log",
            "/srv/apps/com.example.a/data/state.db",
        ] {
            assert!(
                resolve_app_entry(apps, Path::new(path)).is_none(),
                "{path} should be ignored"
            );
        }
    }

    #[test]
    fn test_ignores_staging_and_foreign_paths() {
        let apps = Path::new("/srv/apps");
        assert!(resolve_app_entry(apps, Path::new("/srv/apps/com.example.a.updating/binary")).is_none());
        assert!(resolve_app_entry(apps, Path::new("/srv/apps/com.example.a.pending")).is_none());
        assert!(resolve_app_entry(apps, Path::new("/srv/apps/.registry.redb")).is_none());
        assert!(resolve_app_entry(apps, Path::new("/elsewhere/com.example.a/binary")).is_none());
    }

    #[test]
    fn test_ignores_invalid_ids() {
        let apps = Path::new("/srv/apps");
        assert!(resolve_app_entry(apps, Path::new("/srv/apps/Weird Name/file")).is_none());
    }
}
