//! The gateway adapter.
//!
//! Converts host chat requests into gateway wire requests — stripping
//! the user's bearer token unless the manifest grants `user:token` — and
//! the app's streaming events back into host streaming events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt as _;
use tonic::transport::Channel;
use tracing::debug;

use nebo_core::contract::{ChatEvent, ChatGateway, ChatRequest};
use nebo_core::{AppId, CoreError, CoreResult};
use nebo_inspect::{Direction, EventType, Inspector, InspectorEvent};
use nebo_proto::v1::gateway_client::GatewayClient;
use nebo_proto::v1::{self, ChatEventType};

/// Bridges one app's gateway service to the host's [`ChatGateway`].
pub struct GatewayAdapter {
    app_id: AppId,
    client: GatewayClient<Channel>,
    /// Whether the manifest grants `user:token` (exact or wildcard).
    forward_user_token: bool,
    inspector: Option<Arc<Inspector>>,
}

impl GatewayAdapter {
    /// Create a gateway adapter.
    #[must_use]
    pub fn new(
        app_id: AppId,
        client: GatewayClient<Channel>,
        forward_user_token: bool,
        inspector: Option<Arc<Inspector>>,
    ) -> Self {
        Self {
            app_id,
            client,
            forward_user_token,
            inspector,
        }
    }

    /// The app this adapter routes to.
    #[must_use]
    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    fn to_wire(&self, request: ChatRequest) -> v1::ChatRequest {
        let bearer_token = if self.forward_user_token {
            request.bearer_token.unwrap_or_default()
        } else {
            String::new()
        };
        v1::ChatRequest {
            model: request.model,
            messages: request
                .messages
                .into_iter()
                .map(|turn| v1::ChatMessage {
                    role: turn.role,
                    content: turn.content,
                })
                .collect(),
            bearer_token,
        }
    }
}

#[async_trait]
impl ChatGateway for GatewayAdapter {
    async fn chat(&self, request: ChatRequest) -> CoreResult<BoxStream<'static, ChatEvent>> {
        let wire = self.to_wire(request);

        let inspector = self
            .inspector
            .as_ref()
            .filter(|inspector| inspector.is_active())
            .cloned();
        if let Some(inspector) = &inspector {
            inspector.record(InspectorEvent::new(
                self.app_id.clone(),
                "nebo.app.v1.Gateway/ChatCompletion",
                EventType::StreamOpen,
                Direction::Request,
                nebo_inspect::marshal(&wire),
            ));
        }

        let mut client = self.client.clone();
        let streaming = match client.chat_completion(wire).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                if let Some(inspector) = &inspector {
                    inspector.record(
                        InspectorEvent::new(
                            self.app_id.clone(),
                            "nebo.app.v1.Gateway/ChatCompletion",
                            EventType::StreamOpen,
                            Direction::Response,
                            Vec::new(),
                        )
                        .with_error(status.to_string()),
                    );
                }
                return Err(CoreError::CapabilityCall(status.to_string()));
            },
        };

        let app_id = self.app_id.clone();
        let seq = Arc::new(AtomicU64::new(0));
        let events = streaming.map(move |item| {
            let event = match item {
                Ok(wire_event) => {
                    if let Some(inspector) = &inspector {
                        inspector.record(
                            InspectorEvent::new(
                                app_id.clone(),
                                "nebo.app.v1.Gateway/ChatCompletion",
                                EventType::StreamRecv,
                                Direction::Response,
                                nebo_inspect::marshal(&wire_event),
                            )
                            .with_stream_seq(seq.fetch_add(1, Ordering::Relaxed)),
                        );
                    }
                    match wire_event.event_type() {
                        ChatEventType::Delta => ChatEvent::Delta(wire_event.content),
                        ChatEventType::Done => ChatEvent::Done,
                        ChatEventType::Error => ChatEvent::Error(wire_event.error),
                        ChatEventType::Unspecified => {
                            debug!("Gateway stream event with unspecified type, treating as delta");
                            ChatEvent::Delta(wire_event.content)
                        },
                    }
                },
                Err(status) => {
                    if let Some(inspector) = &inspector {
                        inspector.record(
                            InspectorEvent::new(
                                app_id.clone(),
                                "nebo.app.v1.Gateway/ChatCompletion",
                                EventType::StreamRecv,
                                Direction::Response,
                                Vec::new(),
                            )
                            .with_stream_seq(seq.fetch_add(1, Ordering::Relaxed))
                            .with_error(status.to_string()),
                        );
                    }
                    ChatEvent::Error(status.to_string())
                },
            };
            event
        });

        Ok(events.boxed())
    }
}

impl std::fmt::Debug for GatewayAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayAdapter")
            .field("app_id", &self.app_id)
            .field("forward_user_token", &self.forward_user_token)
            .finish_non_exhaustive()
    }
}
