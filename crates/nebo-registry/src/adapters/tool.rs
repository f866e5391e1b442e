//! The tool adapter.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tonic::transport::Channel;

use nebo_core::contract::ToolInvoker;
use nebo_core::{AppId, CoreError, CoreResult};
use nebo_inspect::{Direction, EventType, Inspector, InspectorEvent};
use nebo_proto::v1::tool_client::ToolClient;
use nebo_proto::v1::ToolExecuteRequest;

/// Bridges one declared `tool:<name>` to the host's [`ToolInvoker`].
pub struct ToolAdapter {
    app_id: AppId,
    name: String,
    client: ToolClient<Channel>,
    inspector: Option<Arc<Inspector>>,
}

impl ToolAdapter {
    /// Create a tool adapter for `tool:<name>`.
    #[must_use]
    pub fn new(
        app_id: AppId,
        name: impl Into<String>,
        client: ToolClient<Channel>,
        inspector: Option<Arc<Inspector>>,
    ) -> Self {
        Self {
            app_id,
            name: name.into(),
            client,
            inspector,
        }
    }

    /// The app this adapter routes to.
    #[must_use]
    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }
}

#[async_trait]
impl ToolInvoker for ToolAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, arguments: serde_json::Value) -> CoreResult<serde_json::Value> {
        let request = ToolExecuteRequest {
            tool: self.name.clone(),
            arguments_json: serde_json::to_vec(&arguments)
                .map_err(|e| CoreError::CapabilityCall(e.to_string()))?,
        };

        let active = self
            .inspector
            .as_ref()
            .filter(|inspector| inspector.is_active())
            .cloned();
        if let Some(inspector) = &active {
            inspector.record(InspectorEvent::new(
                self.app_id.clone(),
                "nebo.app.v1.Tool/Execute",
                EventType::Unary,
                Direction::Request,
                nebo_inspect::marshal(&request),
            ));
        }

        let mut client = self.client.clone();
        let start = Instant::now();
        let outcome = client.execute(request).await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let response = match outcome {
            Ok(response) => response.into_inner(),
            Err(status) => {
                if let Some(inspector) = &active {
                    inspector.record(
                        InspectorEvent::new(
                            self.app_id.clone(),
                            "nebo.app.v1.Tool/Execute",
                            EventType::Unary,
                            Direction::Response,
                            Vec::new(),
                        )
                        .with_duration_ms(duration_ms)
                        .with_error(status.to_string()),
                    );
                }
                return Err(CoreError::CapabilityCall(status.to_string()));
            },
        };

        if let Some(inspector) = &active {
            inspector.record(
                InspectorEvent::new(
                    self.app_id.clone(),
                    "nebo.app.v1.Tool/Execute",
                    EventType::Unary,
                    Direction::Response,
                    nebo_inspect::marshal(&response),
                )
                .with_duration_ms(duration_ms),
            );
        }

        if !response.error.is_empty() {
            return Err(CoreError::CapabilityCall(response.error));
        }
        if response.result_json.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&response.result_json)
            .map_err(|e| CoreError::CapabilityCall(format!("unparseable tool result: {e}")))
    }
}

impl std::fmt::Debug for ToolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolAdapter")
            .field("app_id", &self.app_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
