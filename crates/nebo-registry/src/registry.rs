//! The app registry.
//!
//! Discovers installed apps, launches them through the runtime, builds
//! capability adapters gated by the permission floor, and owns
//! quarantine, uninstall, sideload, and the hourly revocation sweep.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use nebo_core::{
    AppId, Capability, Manifest, Permission, PermissionPrefix, PlatformConfig, RegistryEvent,
};
use nebo_hooks::HookDispatcher;
use nebo_inspect::Inspector;
use nebo_package::locate_binary;
use nebo_runtime::socket::SOCKET_FILE_NAME;
use nebo_runtime::{AppProcess, AppRuntime};

use crate::adapters::{
    streams, AppAdapters, GatewayAdapter, HostBridges, SettingsBridge, ToolAdapter, UiAdapter,
};
use crate::error::{RegistryError, RegistryResult};
use crate::store::{StatusRow, StatusStore};

/// Marker file whose presence blocks launching an app.
pub const QUARANTINE_MARKER: &str = ".quarantined";

/// Period of the revocation sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Capacity of the registry event channel.
const EVENT_CAPACITY: usize = 64;

/// The app registry.
pub struct AppRegistry {
    config: Arc<PlatformConfig>,
    runtime: Arc<AppRuntime>,
    dispatcher: Arc<HookDispatcher>,
    store: Option<Arc<StatusStore>>,
    bridges: HostBridges,
    inspector: Option<Arc<Inspector>>,
    adapters: RwLock<std::collections::HashMap<AppId, AppAdapters>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl AppRegistry {
    /// Create a registry.
    #[must_use]
    pub fn new(
        config: Arc<PlatformConfig>,
        runtime: Arc<AppRuntime>,
        dispatcher: Arc<HookDispatcher>,
        store: Option<Arc<StatusStore>>,
        inspector: Option<Arc<Inspector>>,
        bridges: HostBridges,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            runtime,
            dispatcher,
            store,
            bridges,
            inspector,
            adapters: RwLock::new(std::collections::HashMap::new()),
            events,
        }
    }

    /// The platform configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<PlatformConfig> {
        &self.config
    }

    /// The runtime.
    #[must_use]
    pub fn runtime(&self) -> &Arc<AppRuntime> {
        &self.runtime
    }

    /// The hook dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<HookDispatcher> {
        &self.dispatcher
    }

    /// The status store, if configured.
    #[must_use]
    pub fn store(&self) -> Option<&Arc<StatusStore>> {
        self.store.as_ref()
    }

    /// Subscribe to registry events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Publish a registry event to observers.
    pub fn emit(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }

    /// Scan the apps directory and launch everything launchable.
    ///
    /// A subdirectory qualifies when it resolves to a real directory
    /// (symlinks are sideloaded dev apps), contains `manifest.json`, and
    /// carries no `.quarantined` marker. Per-app failures are isolated.
    ///
    /// Returns the number of apps launched.
    pub async fn discover_and_launch(&self) -> usize {
        if let Err(e) = std::fs::create_dir_all(&self.config.apps_dir) {
            error!(dir = %self.config.apps_dir.display(), error = %e, "Cannot create apps directory");
            return 0;
        }
        let entries = match std::fs::read_dir(&self.config.apps_dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!(dir = %self.config.apps_dir.display(), error = %e, "Cannot read apps directory");
                return 0;
            },
        };

        let mut launched = 0usize;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if is_transient_entry(name) {
                continue;
            }
            let dir = entry.path();
            // is_dir follows symlinks, admitting sideloaded apps.
            if !dir.is_dir() {
                continue;
            }
            if dir.join(QUARANTINE_MARKER).exists() {
                debug!(dir = %dir.display(), "Skipping quarantined app");
                continue;
            }
            if !dir.join("manifest.json").is_file() {
                continue;
            }
            match self.launch_and_register(&dir).await {
                Ok(record) => {
                    launched = launched.saturating_add(1);
                    debug!(app_id = %record.id(), "Discovered and launched app");
                },
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to launch discovered app");
                },
            }
        }
        info!(count = launched, "App discovery complete");
        launched
    }

    /// Launch an app directory and register its capabilities.
    ///
    /// # Errors
    ///
    /// Launch and registration failures; see [`RegistryError`].
    pub async fn launch_and_register(&self, app_dir: &Path) -> RegistryResult<Arc<AppProcess>> {
        let record = self.runtime.launch(app_dir).await?;
        self.register(&record).await?;
        Ok(record)
    }

    /// Register a launched app: status row, adapters per capability
    /// (permission floor enforced), hook subscriptions, settings bridge.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Store`] on status-store failure.
    pub async fn register(&self, record: &Arc<AppProcess>) -> RegistryResult<()> {
        let manifest = record.manifest();
        let id = record.id().clone();

        // Replace any previous registration wholesale.
        self.deregister_capabilities(&id).await;

        if let Some(store) = &self.store {
            store.upsert(&StatusRow {
                id: id.to_string(),
                name: manifest.name.clone(),
                version: manifest.version.clone(),
                connected: false,
                quarantined: false,
                updated_at: Utc::now(),
            })?;
        }

        let clients = record.clients().await;
        let mut adapters = AppAdapters::default();

        for capability in permitted_capabilities(manifest) {
            self.build_adapter(&id, manifest, &capability, &clients, &mut adapters);
        }

        if manifest.settings.is_some() {
            adapters.settings = Some(Arc::new(SettingsBridge::new(id.clone(), clients.clone())));
        }

        info!(app_id = %id, capabilities = ?adapters.active, "Registered app");
        self.adapters.write().await.insert(id.clone(), adapters);

        if let Some(store) = &self.store {
            store.set_connected(&id, true)?;
        }
        Ok(())
    }

    fn build_adapter(
        &self,
        id: &AppId,
        manifest: &Manifest,
        capability: &Capability,
        clients: &nebo_runtime::CapabilityClients,
        adapters: &mut AppAdapters,
    ) {
        match capability {
            Capability::Gateway => {
                if let Some(client) = &clients.gateway {
                    let forward_user_token = manifest
                        .permissions
                        .allows(&Permission::from_parts(PermissionPrefix::User, "token"));
                    adapters.gateway = Some(Arc::new(GatewayAdapter::new(
                        id.clone(),
                        client.clone(),
                        forward_user_token,
                        self.inspector.clone(),
                    )));
                    adapters.active.push(capability.clone());
                }
            },
            Capability::Tool(name) => {
                if let Some(client) = &clients.tool {
                    adapters.tools.push(Arc::new(ToolAdapter::new(
                        id.clone(),
                        name.clone(),
                        client.clone(),
                        self.inspector.clone(),
                    )));
                    adapters.active.push(capability.clone());
                }
            },
            Capability::Ui => {
                if let Some(client) = &clients.ui {
                    adapters.ui = Some(Arc::new(UiAdapter::new(id.clone(), client.clone())));
                    adapters.active.push(capability.clone());
                }
            },
            Capability::Comm => {
                if let Some(client) = &clients.comm {
                    if let Some(tx) = &self.bridges.comm_tx {
                        adapters.stream_tasks.push(streams::spawn_comm_receive(
                            id.clone(),
                            client.clone(),
                            tx.clone(),
                            adapters.cancel.clone(),
                        ));
                    }
                    adapters.active.push(capability.clone());
                }
            },
            Capability::Channel(_) => {
                if let Some(client) = &clients.channel {
                    if let Some(callback) = &self.bridges.on_channel_message {
                        adapters.stream_tasks.push(streams::spawn_channel_receive(
                            id.clone(),
                            client.clone(),
                            Arc::clone(callback),
                            adapters.cancel.clone(),
                        ));
                    }
                    adapters.active.push(capability.clone());
                }
            },
            Capability::Schedule => {
                if let Some(client) = &clients.schedule {
                    if let Some(callback) = &self.bridges.on_schedule_fire {
                        adapters.stream_tasks.push(streams::spawn_schedule_triggers(
                            id.clone(),
                            client.clone(),
                            Arc::clone(callback),
                            adapters.cancel.clone(),
                        ));
                    }
                    adapters.active.push(capability.clone());
                }
            },
            Capability::Hooks => {
                if let Some(client) = &clients.hooks {
                    self.dispatcher.register_app(id, &manifest.hooks, client.clone());
                    adapters.active.push(capability.clone());
                }
            },
            // Vision/browser apps run without a typed client surface.
            Capability::Vision | Capability::Browser => {},
        }
    }

    /// Remove every adapter and hook subscription of an app, so the host
    /// stops routing through its gRPC connection.
    pub async fn deregister_capabilities(&self, id: &AppId) {
        let removed = self.adapters.write().await.remove(id);
        if let Some(mut adapters) = removed {
            adapters.shutdown();
            debug!(app_id = %id, "Deregistered capabilities");
        }
        self.dispatcher.deregister_app(id);
        if let Some(store) = &self.store {
            let _ = store.set_connected(id, false);
        }
    }

    /// Stop an app's process and deregister its capabilities.
    ///
    /// # Errors
    ///
    /// Propagates runtime stop failures other than "not running".
    pub async fn stop_app(&self, id: &AppId) -> RegistryResult<()> {
        self.deregister_capabilities(id).await;
        match self.runtime.stop(id).await {
            Ok(()) | Err(nebo_runtime::RuntimeError::NotRunning(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop and relaunch an app from its directory, re-registering
    /// capabilities.
    ///
    /// # Errors
    ///
    /// Launch and registration failures; see [`RegistryError`].
    pub async fn relaunch(&self, id: &AppId) -> RegistryResult<Arc<AppProcess>> {
        self.deregister_capabilities(id).await;
        let record = self.runtime.relaunch(id).await?;
        self.register(&record).await?;
        Ok(record)
    }

    /// Quarantine an app: stop it, drop its adapters, remove binary and
    /// socket but preserve `data/` and `logs/`, write the marker, notify
    /// observers.
    ///
    /// # Errors
    ///
    /// Returns I/O failures writing the marker.
    pub async fn quarantine(&self, id: &AppId) -> RegistryResult<()> {
        warn!(app_id = %id, "Quarantining app");
        self.deregister_capabilities(id).await;
        let _ = self.runtime.stop(id).await;

        let dir = self.config.app_dir(id);
        for name in ["binary", "app"] {
            let _ = std::fs::remove_file(dir.join(name));
        }
        let _ = std::fs::remove_file(dir.join(SOCKET_FILE_NAME));
        std::fs::write(dir.join(QUARANTINE_MARKER), b"")?;

        if let Some(store) = &self.store {
            store.set_quarantined(id, true)?;
        }
        self.emit(RegistryEvent::Quarantined { app_id: id.clone() });
        Ok(())
    }

    /// Uninstall an app entirely: stop, remove the status row, delete
    /// the directory and any `.updating` / `.pending` siblings.
    ///
    /// # Errors
    ///
    /// Returns I/O failures removing the directory.
    pub async fn uninstall(&self, id: &AppId) -> RegistryResult<()> {
        info!(app_id = %id, "Uninstalling app");
        self.deregister_capabilities(id).await;
        let _ = self.runtime.stop(id).await;

        if let Some(store) = &self.store {
            store.remove(id)?;
        }

        let dir = self.config.app_dir(id);
        remove_dir_if_present(&dir)?;
        remove_dir_if_present(&sibling(&dir, ".updating"))?;
        remove_dir_if_present(&sibling(&dir, ".pending"))?;

        self.emit(RegistryEvent::Uninstalled { app_id: id.clone() });
        Ok(())
    }

    /// Sideload a developer project: validate it, build it if a Makefile
    /// is present, symlink it into the apps directory, and launch
    /// immediately for tight feedback.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Sideload`] on validation/build failures.
    pub async fn sideload(&self, project_dir: &Path) -> RegistryResult<Arc<AppProcess>> {
        let project_dir = project_dir
            .canonicalize()
            .map_err(|e| RegistryError::Sideload(format!("project directory: {e}")))?;
        if !project_dir.is_dir() {
            return Err(RegistryError::Sideload(format!(
                "{} is not a directory",
                project_dir.display()
            )));
        }
        let manifest = Manifest::load(&project_dir)?;

        if project_dir.join("Makefile").is_file() {
            info!(app_id = %manifest.id, "Running make build for sideloaded app");
            let output = tokio::process::Command::new("make")
                .arg("build")
                .current_dir(&project_dir)
                .output()
                .await
                .map_err(|e| RegistryError::Sideload(format!("make build: {e}")))?;
            if !output.status.success() {
                return Err(RegistryError::Sideload(format!(
                    "make build failed: {}",
                    String::from_utf8_lossy(&output.stderr)
                )));
            }
            debug!(
                app_id = %manifest.id,
                stdout = %String::from_utf8_lossy(&output.stdout),
                "make build completed"
            );
        }

        locate_binary(&project_dir)?;

        let link = self.config.app_dir(&manifest.id);
        match std::fs::symlink_metadata(&link) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let target = std::fs::read_link(&link)?;
                if target != project_dir {
                    warn!(app_id = %manifest.id, "Repointing sideload symlink");
                    std::fs::remove_file(&link)?;
                    make_symlink(&project_dir, &link)?;
                }
            },
            Ok(_) => {
                return Err(RegistryError::Sideload(format!(
                    "{} collides with an installed app",
                    link.display()
                )));
            },
            Err(_) => make_symlink(&project_dir, &link)?,
        }

        self.launch_and_register(&link).await
    }

    /// Hourly revocation sweep: quarantine any live app on the
    /// revocation list. Returns immediately if no checker is configured.
    pub async fn run_revocation_sweep(&self, cancel: CancellationToken) {
        let Some(revocations) = self.runtime.revocations().cloned() else {
            debug!("No revocation checker configured, sweep disabled");
            return;
        };
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }
            for id in self.runtime.live_ids().await {
                match revocations.is_revoked(&id).await {
                    Ok(true) => {
                        if let Err(e) = self.quarantine(&id).await {
                            error!(app_id = %id, error = %e, "Failed to quarantine revoked app");
                        }
                    },
                    Ok(false) => {},
                    Err(e) => {
                        warn!(app_id = %id, error = %e, "Revocation check failed during sweep");
                    },
                }
            }
        }
    }

    /// Run one revocation-sweep pass immediately (startup and tests).
    pub async fn sweep_once(&self) {
        let Some(revocations) = self.runtime.revocations().cloned() else {
            return;
        };
        for id in self.runtime.live_ids().await {
            if let Ok(true) = revocations.is_revoked(&id).await
                && let Err(e) = self.quarantine(&id).await
            {
                error!(app_id = %id, error = %e, "Failed to quarantine revoked app");
            }
        }
    }

    // -----------------------------------------------------------------
    // Adapter lookup
    // -----------------------------------------------------------------

    /// The gateway adapter for an app, if active.
    pub async fn gateway(&self, id: &AppId) -> Option<Arc<GatewayAdapter>> {
        self.adapters.read().await.get(id)?.gateway.clone()
    }

    /// A tool adapter by name, if active.
    pub async fn tool(&self, id: &AppId, name: &str) -> Option<Arc<ToolAdapter>> {
        use nebo_core::contract::ToolInvoker as _;

        self.adapters
            .read()
            .await
            .get(id)?
            .tools
            .iter()
            .find(|tool| tool.name() == name)
            .cloned()
    }

    /// All tool adapters for an app.
    pub async fn tools(&self, id: &AppId) -> Vec<Arc<ToolAdapter>> {
        self.adapters
            .read()
            .await
            .get(id)
            .map(|adapters| adapters.tools.clone())
            .unwrap_or_default()
    }

    /// The UI adapter for an app, if active.
    pub async fn ui(&self, id: &AppId) -> Option<Arc<UiAdapter>> {
        self.adapters.read().await.get(id)?.ui.clone()
    }

    /// The settings bridge for an app, if registered.
    pub async fn configurable(&self, id: &AppId) -> Option<Arc<SettingsBridge>> {
        self.adapters.read().await.get(id)?.settings.clone()
    }

    /// The capabilities that got adapters for an app.
    pub async fn active_capabilities(&self, id: &AppId) -> Vec<Capability> {
        self.adapters
            .read()
            .await
            .get(id)
            .map(|adapters| adapters.active.clone())
            .unwrap_or_default()
    }

    /// Whether any adapter is registered for an app.
    pub async fn has_adapters(&self, id: &AppId) -> bool {
        self.adapters.read().await.contains_key(id)
    }
}

impl std::fmt::Debug for AppRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRegistry").finish_non_exhaustive()
    }
}

/// The declared capabilities that clear their permission floor.
///
/// Exactly `gateway`, `comm`, `channel:*`, and `schedule` carry a floor;
/// a declared capability whose floor prefix is missing from the
/// manifest's permissions is skipped with a warning and never gets an
/// adapter.
#[must_use]
pub fn permitted_capabilities(manifest: &Manifest) -> Vec<Capability> {
    manifest
        .capabilities
        .iter()
        .filter(|capability| {
            if let Some(required) = capability.permission_floor()
                && !manifest.permissions.has_prefix(required)
            {
                warn!(
                    app_id = %manifest.id,
                    capability = %capability,
                    required = %required,
                    "Skipping adapter, permission floor unmet"
                );
                return false;
            }
            true
        })
        .cloned()
        .collect()
}

/// `.updating` / `.pending` staging directories and dotfiles are not
/// apps.
fn is_transient_entry(name: &str) -> bool {
    name.starts_with('.') || name.ends_with(".updating") || name.ends_with(".pending")
}

/// `<dir>.updating`-style sibling of an app directory.
pub(crate) fn sibling(dir: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = dir.file_name().map(std::ffi::OsString::from).unwrap_or_default();
    name.push(suffix);
    dir.with_file_name(name)
}

fn remove_dir_if_present(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn make_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_dir(target, link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_entries() {
        assert!(is_transient_entry(".DS_Store"));
        assert!(is_transient_entry("com.example.a.updating"));
        assert!(is_transient_entry("com.example.a.pending"));
        assert!(!is_transient_entry("com.example.a"));
    }

    #[test]
    fn test_sibling_paths() {
        let dir = Path::new("/srv/apps/com.example.a");
        assert_eq!(
            sibling(dir, ".updating"),
            Path::new("/srv/apps/com.example.a.updating")
        );
        assert_eq!(
            sibling(dir, ".pending"),
            Path::new("/srv/apps/com.example.a.pending")
        );
    }

    fn manifest(capabilities: &[&str], permissions: &[&str]) -> Manifest {
        let json = serde_json::json!({
            "id": "com.example.a",
            "name": "Test",
            "version": "1.0.0",
            "capabilities": capabilities,
            "permissions": permissions
        });
        Manifest::from_slice(&serde_json::to_vec(&json).unwrap()).unwrap()
    }

    #[test]
    fn test_floor_gates_gateway() {
        let allowed = permitted_capabilities(&manifest(
            &["gateway"],
            &["network:api.openai.com:443"],
        ));
        assert_eq!(allowed, vec![Capability::Gateway]);

        let denied = permitted_capabilities(&manifest(&["gateway"], &[]));
        assert!(denied.is_empty());
    }

    #[test]
    fn test_floor_gates_exactly_four_families() {
        // comm, channel:*, schedule require their prefixes.
        assert!(permitted_capabilities(&manifest(&["comm"], &[])).is_empty());
        assert!(permitted_capabilities(&manifest(&["channel:slack"], &[])).is_empty());
        assert!(permitted_capabilities(&manifest(&["schedule"], &[])).is_empty());

        assert!(!permitted_capabilities(&manifest(&["comm"], &["comm:send"])).is_empty());
        assert!(
            !permitted_capabilities(&manifest(&["channel:slack"], &["channel:receive"]))
                .is_empty()
        );
        assert!(!permitted_capabilities(&manifest(&["schedule"], &["schedule:create"])).is_empty());

        // ui, tool:*, hooks, vision, browser have no floor.
        let open = permitted_capabilities(&manifest(
            &["ui", "tool:web", "hooks", "vision", "browser"],
            &[],
        ));
        assert_eq!(open.len(), 5);
    }
}
