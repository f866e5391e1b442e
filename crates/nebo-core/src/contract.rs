//! Host-facing capability contracts.
//!
//! The registry bridges each app's gRPC surface behind one of these small
//! traits. Host components consume the traits and never see wire types.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::CoreResult;
use crate::id::AppId;

/// One turn in a chat conversation.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    /// `system`, `user`, `assistant`, or `tool`.
    pub role: String,
    /// Message content.
    pub content: String,
}

/// A chat request the host routes through a gateway app.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<ChatTurn>,
    /// The calling user's bearer token. The adapter strips this unless
    /// the app's manifest grants `user:token`.
    pub bearer_token: Option<String>,
}

/// A streaming chat event produced by a gateway app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A content delta.
    Delta(String),
    /// The stream completed.
    Done,
    /// The app reported an error.
    Error(String),
}

/// The host's view of a gateway capability.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Stream a chat completion through the app.
    async fn chat(&self, request: ChatRequest) -> CoreResult<BoxStream<'static, ChatEvent>>;
}

/// The host's view of a named tool capability.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// The tool's name as declared (`tool:<name>`).
    fn name(&self) -> &str;

    /// Invoke the tool with JSON arguments.
    async fn invoke(&self, arguments: serde_json::Value) -> CoreResult<serde_json::Value>;
}

/// The host's view of a UI capability.
#[async_trait]
pub trait UiSurface: Send + Sync {
    /// Render a view with JSON props, returning markup.
    async fn render(&self, view: &str, props: serde_json::Value) -> CoreResult<String>;
}

/// Settings hot-reload contract. Implementations forward the new map over
/// gRPC to whichever capability client is present.
#[async_trait]
pub trait Configurable: Send + Sync {
    /// Called when the operator changes the app's settings.
    async fn on_settings_changed(&self, settings: HashMap<String, String>) -> CoreResult<()>;
}

/// An inbound message from an app's comm capability, forwarded to the
/// host's comm plane.
#[derive(Debug, Clone)]
pub struct CommInbound {
    /// The app that produced the message.
    pub app_id: AppId,
    /// Sender identity on the comm plane.
    pub from: String,
    /// Message payload.
    pub payload: serde_json::Value,
}

/// An inbound message from an app's channel capability.
#[derive(Debug, Clone)]
pub struct ChannelInbound {
    /// The app that produced the message.
    pub app_id: AppId,
    /// Channel type (`channel:<type>`).
    pub channel: String,
    /// Sender identity on the external channel.
    pub sender: String,
    /// Message payload.
    pub payload: serde_json::Value,
}

/// A schedule trigger fired by an app.
#[derive(Debug, Clone)]
pub struct ScheduleFire {
    /// The app that fired.
    pub app_id: AppId,
    /// The app-defined schedule identifier.
    pub schedule_id: String,
    /// When it fired.
    pub fired_at: DateTime<Utc>,
    /// Trigger payload.
    pub payload: serde_json::Value,
}
