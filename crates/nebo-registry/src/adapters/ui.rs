//! The UI adapter.

use async_trait::async_trait;
use tonic::transport::Channel;

use nebo_core::contract::UiSurface;
use nebo_core::{AppId, CoreError, CoreResult};
use nebo_proto::v1::ui_client::UiClient;
use nebo_proto::v1::UiRenderRequest;

/// Bridges one app's UI service to the host's [`UiSurface`].
pub struct UiAdapter {
    app_id: AppId,
    client: UiClient<Channel>,
}

impl UiAdapter {
    /// Create a UI adapter.
    #[must_use]
    pub fn new(app_id: AppId, client: UiClient<Channel>) -> Self {
        Self { app_id, client }
    }

    /// The app this adapter routes to.
    #[must_use]
    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }
}

#[async_trait]
impl UiSurface for UiAdapter {
    async fn render(&self, view: &str, props: serde_json::Value) -> CoreResult<String> {
        let mut client = self.client.clone();
        let response = client
            .render(UiRenderRequest {
                view: view.to_string(),
                props_json: serde_json::to_vec(&props)
                    .map_err(|e| CoreError::CapabilityCall(e.to_string()))?,
            })
            .await
            .map_err(|status| CoreError::CapabilityCall(status.to_string()))?;
        Ok(response.into_inner().html)
    }
}

impl std::fmt::Debug for UiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiAdapter")
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}
