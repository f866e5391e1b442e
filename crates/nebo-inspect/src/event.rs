//! Inspector event model.

use chrono::{DateTime, Utc};
use serde::Serialize;

use nebo_core::AppId;

/// What kind of gRPC activity an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A unary call.
    Unary,
    /// A stream was opened (or failed to open).
    StreamOpen,
    /// A message was sent on a stream.
    StreamSend,
    /// A message was received on a stream.
    StreamRecv,
}

/// Which direction the recorded payload traveled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Host → app.
    Request,
    /// App → host.
    Response,
}

/// One recorded gRPC event.
#[derive(Debug, Clone, Serialize)]
pub struct InspectorEvent {
    /// Monotonic id, assigned at record time.
    pub id: u64,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The app whose connection produced the event.
    pub app_id: AppId,
    /// Full gRPC method path.
    pub method: String,
    /// Activity kind.
    pub event_type: EventType,
    /// Payload direction.
    pub direction: Direction,
    /// Marshaled payload bytes (JSON, or a sentinel string).
    pub payload: Vec<u8>,
    /// Call duration; unary responses only.
    pub duration_ms: Option<u64>,
    /// Transport or status error, if any.
    pub error: Option<String>,
    /// Per-direction sequence number within a stream.
    pub stream_seq: u64,
}

impl InspectorEvent {
    /// A new event with id 0; [`Inspector::record`](crate::Inspector::record)
    /// assigns the real id.
    #[must_use]
    pub fn new(
        app_id: AppId,
        method: impl Into<String>,
        event_type: EventType,
        direction: Direction,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            app_id,
            method: method.into(),
            event_type,
            direction,
            payload,
            duration_ms: None,
            error: None,
            stream_seq: 0,
        }
    }

    /// Attach a unary call duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attach an error.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach a stream sequence number.
    #[must_use]
    pub fn with_stream_seq(mut self, seq: u64) -> Self {
        self.stream_seq = seq;
        self
    }
}
