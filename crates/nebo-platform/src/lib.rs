//! Top-level assembly of the Nebo app runtime platform.
//!
//! The host constructs one [`Platform`] value and passes references
//! downward; there are no globals. The platform owns the runtime, the
//! registry, the hook dispatcher, the inspector, and the background
//! loops (supervisor, filesystem watcher, revocation sweep), and it
//! tears everything down on [`shutdown`](Platform::shutdown).
//!
//! The ownership is deliberately one-way: the install pipeline holds the
//! registry, the supervisor holds registry and runtime, and the runtime
//! holds no back-references.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nebo_core::{InstallEvent, PlatformConfig, RegistryEvent, SupervisorEvent};
use nebo_crypto::{HttpKeyProvider, HttpRevocationChecker, PackageVerifier, RevocationCheck};
use nebo_hooks::HookDispatcher;
use nebo_inspect::Inspector;
use nebo_registry::{
    AppRegistry, AppWatcher, HostBridges, InstallPipeline, RegistryError, StatusStore, Supervisor,
};
use nebo_runtime::AppRuntime;

/// Errors from platform assembly.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// Failed to build the shared HTTP client.
    #[error("HTTP client: {0}")]
    Http(String),

    /// Registry or store failure during construction.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result type for platform assembly.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// The app runtime platform.
pub struct Platform {
    config: Arc<PlatformConfig>,
    runtime: Arc<AppRuntime>,
    registry: Arc<AppRegistry>,
    dispatcher: Arc<HookDispatcher>,
    supervisor: Arc<Supervisor>,
    inspector: Arc<Inspector>,
    install: InstallPipeline,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Platform {
    /// Assemble the platform from its configuration.
    ///
    /// With an `api_base_url` configured, signature verification and
    /// revocation checking run against that service; without one (dev
    /// setups), apps launch unverified.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] if the HTTP client or status store
    /// cannot be created.
    pub fn new(config: PlatformConfig, bridges: HostBridges) -> PlatformResult<Self> {
        let config = Arc::new(config);
        let inspector = Arc::new(Inspector::new(config.inspector_capacity));

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| PlatformError::Http(e.to_string()))?;

        let (verifier, revocations): (
            Option<Arc<PackageVerifier>>,
            Option<Arc<dyn RevocationCheck>>,
        ) = match &config.api_base_url {
            Some(base) => {
                let base = base.trim_end_matches('/');
                let keys = Arc::new(HttpKeyProvider::new(
                    http.clone(),
                    format!("{base}/api/v1/signing-key"),
                ));
                let checker = Arc::new(HttpRevocationChecker::new(
                    http.clone(),
                    format!("{base}/api/v1/revocations"),
                ));
                (Some(Arc::new(PackageVerifier::new(keys))), Some(checker))
            },
            None => {
                warn!("No API base configured; packages launch without signature verification");
                (None, None)
            },
        };

        let runtime = Arc::new(AppRuntime::new(
            Arc::clone(&config),
            verifier,
            revocations,
            Some(Arc::clone(&inspector)),
        ));
        let dispatcher = Arc::new(HookDispatcher::new(Some(Arc::clone(&inspector))));
        let store = Arc::new(StatusStore::open(&config.data_dir.join("registry.redb"))?);
        let registry = Arc::new(AppRegistry::new(
            Arc::clone(&config),
            Arc::clone(&runtime),
            Arc::clone(&dispatcher),
            Some(store),
            Some(Arc::clone(&inspector)),
            bridges,
        ));
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&runtime),
            Arc::clone(&registry),
        ));
        let install = InstallPipeline::new(Arc::clone(&registry), http);

        Ok(Self {
            config,
            runtime,
            registry,
            dispatcher,
            supervisor,
            inspector,
            install,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Discover installed apps, launch them, and start the background
    /// loops. Returns the number of apps launched.
    pub async fn start(&self) -> usize {
        let launched = self.registry.discover_and_launch().await;

        let mut tasks = self.tasks.lock().await;

        let supervisor = Arc::clone(&self.supervisor);
        let token = self.cancel.child_token();
        tasks.push(tokio::spawn(async move {
            supervisor.run(token).await;
        }));

        match AppWatcher::new(Arc::clone(&self.registry)) {
            Ok(watcher) => {
                let token = self.cancel.child_token();
                tasks.push(tokio::spawn(async move {
                    watcher.run(token).await;
                }));
            },
            Err(e) => warn!(error = %e, "Filesystem watcher unavailable"),
        }

        let registry = Arc::clone(&self.registry);
        let token = self.cancel.child_token();
        tasks.push(tokio::spawn(async move {
            registry.run_revocation_sweep(token).await;
        }));

        info!(launched, "Platform started");
        launched
    }

    /// Handle an install notification from the upstream notifier.
    ///
    /// # Errors
    ///
    /// The failure that was also surfaced to registry event observers.
    pub async fn handle_install_event(&self, event: InstallEvent) -> PlatformResult<()> {
        self.install.handle(event).await.map_err(Into::into)
    }

    /// Stop the background loops and every live app.
    pub async fn shutdown(&self) {
        info!("Platform shutting down");
        self.cancel.cancel();
        let tasks = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain(..).collect::<Vec<_>>()
        };
        for task in tasks {
            let _ = task.await;
        }

        for id in self.runtime.live_ids().await {
            self.registry.deregister_capabilities(&id).await;
        }
        self.runtime.stop_all().await;
        info!("Platform stopped");
    }

    /// The platform configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<PlatformConfig> {
        &self.config
    }

    /// The app runtime.
    #[must_use]
    pub fn runtime(&self) -> &Arc<AppRuntime> {
        &self.runtime
    }

    /// The app registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<AppRegistry> {
        &self.registry
    }

    /// The hook dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<HookDispatcher> {
        &self.dispatcher
    }

    /// The supervisor.
    #[must_use]
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// The gRPC inspector.
    #[must_use]
    pub fn inspector(&self) -> &Arc<Inspector> {
        &self.inspector
    }

    /// Subscribe to registry events (install results, quarantines).
    #[must_use]
    pub fn registry_events(&self) -> tokio::sync::broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }

    /// Subscribe to supervisor events (restarts, give-ups).
    #[must_use]
    pub fn supervisor_events(&self) -> tokio::sync::broadcast::Receiver<SupervisorEvent> {
        self.supervisor.subscribe()
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("apps_dir", &self.config.apps_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(apps: &std::path::Path, data: &std::path::Path) -> PlatformConfig {
        let mut config = PlatformConfig::new(apps, data);
        config.tee_logs = false;
        config
    }

    #[tokio::test]
    async fn test_empty_platform_starts_and_stops() {
        let apps = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let platform =
            Platform::new(config(apps.path(), data.path()), HostBridges::default()).unwrap();

        let launched = platform.start().await;
        assert_eq!(launched, 0);
        assert!(platform.runtime().live_ids().await.is_empty());

        platform.shutdown().await;
    }

    #[tokio::test]
    async fn test_uninstall_event_for_missing_app_is_clean() {
        let apps = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let platform =
            Platform::new(config(apps.path(), data.path()), HostBridges::default()).unwrap();

        let event = InstallEvent {
            kind: nebo_core::InstallEventKind::AppUninstalled,
            app_id: nebo_core::AppId::from_static("com.example.ghost"),
            version: "1.0.0".into(),
            download_url: None,
            settings_schema: None,
        };
        platform.handle_install_event(event).await.unwrap();
    }

    #[tokio::test]
    async fn test_install_without_url_fails_and_reports() {
        let apps = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let platform =
            Platform::new(config(apps.path(), data.path()), HostBridges::default()).unwrap();
        let mut events = platform.registry_events();

        let event = InstallEvent {
            kind: nebo_core::InstallEventKind::AppInstalled,
            app_id: nebo_core::AppId::from_static("com.example.new"),
            version: "1.0.0".into(),
            download_url: None,
            settings_schema: None,
        };
        assert!(platform.handle_install_event(event).await.is_err());

        let observed = events.try_recv().unwrap();
        assert!(matches!(
            observed,
            RegistryEvent::InstallFailed { app_id, .. } if app_id.as_str() == "com.example.new"
        ));

        // No partial directory was left behind.
        assert!(!apps.path().join("com.example.new").exists());
    }
}
