//! The settings hot-reload bridge.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use nebo_core::contract::Configurable;
use nebo_core::{AppId, CoreError, CoreResult};
use nebo_proto::v1::SettingsChanged;
use nebo_runtime::CapabilityClients;

/// Forwards settings changes to the first capability client that exists,
/// in the fixed probe order (gateway → tool → channel → comm → ui →
/// schedule).
pub struct SettingsBridge {
    app_id: AppId,
    clients: CapabilityClients,
}

impl SettingsBridge {
    /// Create a settings bridge over an app's clients.
    #[must_use]
    pub fn new(app_id: AppId, clients: CapabilityClients) -> Self {
        Self { app_id, clients }
    }

    /// The app this bridge forwards to.
    #[must_use]
    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }
}

#[async_trait]
impl Configurable for SettingsBridge {
    async fn on_settings_changed(&self, settings: HashMap<String, String>) -> CoreResult<()> {
        let changed = SettingsChanged { settings };
        let map_err = |status: tonic::Status| CoreError::CapabilityCall(status.to_string());

        if let Some(client) = &self.clients.gateway {
            let mut client = client.clone();
            client.on_settings_changed(changed).await.map_err(map_err)?;
        } else if let Some(client) = &self.clients.tool {
            let mut client = client.clone();
            client.on_settings_changed(changed).await.map_err(map_err)?;
        } else if let Some(client) = &self.clients.channel {
            let mut client = client.clone();
            client.on_settings_changed(changed).await.map_err(map_err)?;
        } else if let Some(client) = &self.clients.comm {
            let mut client = client.clone();
            client.on_settings_changed(changed).await.map_err(map_err)?;
        } else if let Some(client) = &self.clients.ui {
            let mut client = client.clone();
            client.on_settings_changed(changed).await.map_err(map_err)?;
        } else if let Some(client) = &self.clients.schedule {
            let mut client = client.clone();
            client.on_settings_changed(changed).await.map_err(map_err)?;
        } else {
            debug!(app_id = %self.app_id, "No capability client to forward settings to");
        }
        Ok(())
    }
}

impl std::fmt::Debug for SettingsBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsBridge")
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}
