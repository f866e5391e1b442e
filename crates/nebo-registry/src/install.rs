//! The install pipeline.
//!
//! Consumes install notifications from the upstream notifier: fresh
//! installs, staged updates gated on a permission diff, uninstalls, and
//! revocations. Every failure is isolated per event, surfaced to
//! observers, and leaves no partial directory behind.

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt as _;
use tracing::{debug, info, warn};

use nebo_core::{InstallEvent, InstallEventKind, Manifest, RegistryEvent};
use nebo_package::extract_package;

use crate::error::{RegistryError, RegistryResult};
use crate::registry::{sibling, AppRegistry};

/// Download cap for packages.
const MAX_DOWNLOAD_BYTES: u64 = 600 * 1024 * 1024;

/// Executes install notifications against the registry.
pub struct InstallPipeline {
    registry: Arc<AppRegistry>,
    http: reqwest::Client,
}

impl InstallPipeline {
    /// Create a pipeline over the registry, using the shared
    /// short-timeout client for downloads.
    #[must_use]
    pub fn new(registry: Arc<AppRegistry>, http: reqwest::Client) -> Self {
        Self { registry, http }
    }

    /// Handle one install notification. Errors are reported to
    /// observers and returned; the host loop keeps running either way.
    ///
    /// # Errors
    ///
    /// The failure that was also emitted as
    /// [`RegistryEvent::InstallFailed`].
    pub async fn handle(&self, event: InstallEvent) -> RegistryResult<()> {
        let app_id = event.app_id.clone();
        let result = match event.kind {
            InstallEventKind::AppInstalled => self.install(&event).await,
            InstallEventKind::AppUpdated => self.update(&event).await,
            InstallEventKind::AppUninstalled => self.registry.uninstall(&app_id).await,
            InstallEventKind::AppRevoked => self.registry.quarantine(&app_id).await,
        };
        if let Err(e) = &result {
            warn!(app_id = %app_id, kind = ?event.kind, error = %e, "Install event failed");
            self.registry.emit(RegistryEvent::InstallFailed {
                app_id,
                error: e.to_string(),
            });
        }
        result
    }

    async fn install(&self, event: &InstallEvent) -> RegistryResult<()> {
        let id = &event.app_id;
        let dir = self.registry.config().app_dir(id);
        if dir.exists() {
            return Err(RegistryError::AlreadyInstalled(id.clone()));
        }

        let url = self.resolve_url(event)?;
        let package = self.download(&url).await?;

        std::fs::create_dir_all(&dir)?;
        if let Err(e) = self.extract_and_launch(package.path(), &dir).await {
            // No partial install directories.
            let _ = std::fs::remove_dir_all(&dir);
            return Err(e);
        }

        self.registry.emit(RegistryEvent::Installed {
            app_id: id.clone(),
            version: event.version.clone(),
        });
        info!(app_id = %id, version = %event.version, "Installed app");
        Ok(())
    }

    async fn extract_and_launch(&self, package: &Path, dir: &Path) -> RegistryResult<()> {
        let file = std::fs::File::open(package)?;
        extract_package(file, dir)?;
        self.registry.launch_and_register(dir).await?;
        Ok(())
    }

    async fn update(&self, event: &InstallEvent) -> RegistryResult<()> {
        let url = self.resolve_url(event)?;
        let package = self.download(&url).await?;
        self.apply_update(&event.app_id, package.path()).await
    }

    /// Apply an already-downloaded update package: stage it beside the
    /// old version, diff the permission sets, and either swap atomically
    /// or park the update in `.pending` for operator approval.
    ///
    /// # Errors
    ///
    /// Extraction, staging, and relaunch failures; see [`RegistryError`].
    pub async fn apply_update(&self, id: &nebo_core::AppId, package: &Path) -> RegistryResult<()> {
        let dir = self.registry.config().app_dir(id);
        if !dir.is_dir() {
            return Err(RegistryError::NotInstalled(id.clone()));
        }
        let old_manifest = Manifest::load(&dir)?;

        self.registry.stop_app(id).await?;

        // Stage the new version beside the old one.
        let updating = sibling(&dir, ".updating");
        let _ = std::fs::remove_dir_all(&updating);
        std::fs::create_dir_all(&updating)?;
        let staged = (|| -> RegistryResult<Manifest> {
            let file = std::fs::File::open(package)?;
            extract_package(file, &updating)?;
            Ok(Manifest::load(&updating)?)
        })();
        let new_manifest = match staged {
            Ok(manifest) => manifest,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&updating);
                // Bring the old version back up before reporting.
                let _ = self.registry.launch_and_register(&dir).await;
                return Err(e);
            },
        };

        let added = new_manifest.permissions.added_since(&old_manifest.permissions);
        if !added.is_empty() {
            // The update wants more than the operator approved. Park it
            // and bring the old version back.
            let pending = sibling(&dir, ".pending");
            let _ = std::fs::remove_dir_all(&pending);
            std::fs::rename(&updating, &pending)?;
            self.registry.launch_and_register(&dir).await?;

            let added: Vec<String> = added.iter().map(ToString::to_string).collect();
            warn!(app_id = %id, ?added, "Update held for approval, new permissions requested");
            self.registry.emit(RegistryEvent::UpdateHeld {
                app_id: id.clone(),
                version: new_manifest.version.clone(),
                added_permissions: added,
            });
            return Ok(());
        }

        // Carry data and logs into the staged directory, swap, relaunch.
        for keep in ["data", "logs"] {
            let old_path = dir.join(keep);
            if old_path.exists() {
                std::fs::rename(&old_path, updating.join(keep))?;
            }
        }
        std::fs::remove_dir_all(&dir)?;
        std::fs::rename(&updating, &dir)?;
        self.registry.launch_and_register(&dir).await?;

        self.registry.emit(RegistryEvent::Updated {
            app_id: id.clone(),
            version: new_manifest.version.clone(),
        });
        info!(app_id = %id, version = %new_manifest.version, "Updated app");
        Ok(())
    }

    fn resolve_url(&self, event: &InstallEvent) -> RegistryResult<url::Url> {
        let raw = if let Some(direct) = &event.download_url {
            direct.clone()
        } else {
            let base = self
                .registry
                .config()
                .api_base_url
                .as_ref()
                .ok_or_else(|| RegistryError::NoDownloadUrl(event.app_id.clone()))?;
            format!(
                "{}/api/v1/apps/{}/download?version={}",
                base.trim_end_matches('/'),
                event.app_id,
                event.version
            )
        };
        url::Url::parse(&raw).map_err(|e| RegistryError::Download(format!("bad URL {raw}: {e}")))
    }

    /// Stream a package to a temporary file, failing past the 600 MiB
    /// cap.
    async fn download(&self, url: &url::Url) -> RegistryResult<tempfile::NamedTempFile> {
        debug!(url = %url, "Downloading package");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| RegistryError::Download(e.to_string()))?
            .error_for_status()
            .map_err(|e| RegistryError::Download(e.to_string()))?;

        let mut file =
            tempfile::NamedTempFile::new().map_err(|e| RegistryError::Download(e.to_string()))?;
        let mut total: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| RegistryError::Download(e.to_string()))?;
            total = total.saturating_add(chunk.len() as u64);
            if total > MAX_DOWNLOAD_BYTES {
                return Err(RegistryError::DownloadTooLarge {
                    limit: MAX_DOWNLOAD_BYTES,
                });
            }
            file.write_all(&chunk)?;
        }
        file.flush()?;
        Ok(file)
    }
}

impl std::fmt::Debug for InstallPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallPipeline").finish_non_exhaustive()
    }
}
