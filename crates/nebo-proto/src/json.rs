//! Canonical protobuf-JSON forms for the `nebo.app.v1` messages.
//!
//! Hand-maintained alongside the checked-in stubs in `v1.rs` (the build
//! has no protoc step, so there is no descriptor set for a reflective
//! codec). Each impl follows the protobuf JSON mapping: lowerCamelCase
//! field names, enums by their proto names, `int64` as decimal strings,
//! `bytes` as standard base64, maps as objects, and unset `optional`
//! fields omitted. Default-valued fields are emitted rather than
//! omitted. Keep in sync with `proto/nebo/app/v1/app.proto`.

use base64::Engine as _;
use serde_json::{json, Map, Value};

use crate::v1;

/// Types with a canonical protobuf-JSON form.
///
/// Returns `None` for values with no canonical mapping; the inspector's
/// marshaler then falls back to generic JSON.
pub trait ProtoJson {
    /// The canonical protobuf-JSON value.
    fn to_proto_json(&self) -> Option<Value>;
}

fn base64_bytes(bytes: &[u8]) -> Value {
    Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// `int64` maps to a JSON string in the canonical encoding.
fn int64(value: i64) -> Value {
    Value::String(value.to_string())
}

impl ProtoJson for v1::HealthCheckRequest {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({}))
    }
}

impl ProtoJson for v1::HealthCheckResponse {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({
            "healthy": self.healthy,
            "message": self.message,
        }))
    }
}

impl ProtoJson for v1::SettingsChanged {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({ "settings": self.settings }))
    }
}

impl ProtoJson for v1::SettingsAck {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({}))
    }
}

impl ProtoJson for v1::ChatMessage {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({
            "role": self.role,
            "content": self.content,
        }))
    }
}

impl ProtoJson for v1::ChatRequest {
    fn to_proto_json(&self) -> Option<Value> {
        let messages: Vec<Value> = self
            .messages
            .iter()
            .filter_map(ProtoJson::to_proto_json)
            .collect();
        Some(json!({
            "model": self.model,
            "messages": messages,
            "bearerToken": self.bearer_token,
        }))
    }
}

impl ProtoJson for v1::ChatEvent {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({
            "eventType": self.event_type().as_str_name(),
            "content": self.content,
            "error": self.error,
        }))
    }
}

impl ProtoJson for v1::ToolExecuteRequest {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({
            "tool": self.tool,
            "argumentsJson": base64_bytes(&self.arguments_json),
        }))
    }
}

impl ProtoJson for v1::ToolExecuteResponse {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({
            "resultJson": base64_bytes(&self.result_json),
            "error": self.error,
        }))
    }
}

impl ProtoJson for v1::ChannelSendRequest {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({
            "channel": self.channel,
            "payloadJson": base64_bytes(&self.payload_json),
        }))
    }
}

impl ProtoJson for v1::ChannelSendResponse {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({ "accepted": self.accepted }))
    }
}

impl ProtoJson for v1::ChannelReceiveRequest {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({}))
    }
}

impl ProtoJson for v1::ChannelEvent {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({
            "channel": self.channel,
            "sender": self.sender,
            "payloadJson": base64_bytes(&self.payload_json),
        }))
    }
}

impl ProtoJson for v1::CommSendRequest {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({
            "to": self.to,
            "payloadJson": base64_bytes(&self.payload_json),
        }))
    }
}

impl ProtoJson for v1::CommSendResponse {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({ "accepted": self.accepted }))
    }
}

impl ProtoJson for v1::CommReceiveRequest {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({}))
    }
}

impl ProtoJson for v1::CommEvent {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({
            "from": self.from,
            "payloadJson": base64_bytes(&self.payload_json),
        }))
    }
}

impl ProtoJson for v1::UiRenderRequest {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({
            "view": self.view,
            "propsJson": base64_bytes(&self.props_json),
        }))
    }
}

impl ProtoJson for v1::UiRenderResponse {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({ "html": self.html }))
    }
}

impl ProtoJson for v1::TriggerSubscribeRequest {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({}))
    }
}

impl ProtoJson for v1::TriggerEvent {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({
            "scheduleId": self.schedule_id,
            "firedAtUnixMs": int64(self.fired_at_unix_ms),
            "payloadJson": base64_bytes(&self.payload_json),
        }))
    }
}

impl ProtoJson for v1::HookInvocation {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({
            "hook": self.hook,
            "payloadJson": base64_bytes(&self.payload_json),
        }))
    }
}

impl ProtoJson for v1::HookFilterResult {
    fn to_proto_json(&self) -> Option<Value> {
        let mut object = Map::new();
        object.insert("handled".into(), Value::Bool(self.handled));
        // Unset optional fields are omitted in the canonical encoding.
        if let Some(payload) = &self.payload_json {
            object.insert("payloadJson".into(), base64_bytes(payload));
        }
        Some(Value::Object(object))
    }
}

impl ProtoJson for v1::HookActionAck {
    fn to_proto_json(&self) -> Option<Value> {
        Some(json!({}))
    }
}
