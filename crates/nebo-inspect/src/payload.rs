//! Payload marshaling for inspector events.
//!
//! Three tiers, tried in order: the canonical protobuf-JSON form (proper
//! field naming — lowerCamelCase, enums by proto name, `int64` as
//! strings, `bytes` as base64), then generic JSON over the messages'
//! serde derives, then a literal string sentinel when both fail.

use nebo_proto::ProtoJson;
use serde::Serialize;

/// Sentinel recorded when a payload cannot be serialized at all.
const UNSERIALIZABLE: &str = "<unserializable payload>";

/// Marshal a wire message for recording.
pub fn marshal<T>(message: &T) -> Vec<u8>
where
    T: ProtoJson + Serialize,
{
    if let Some(value) = message.to_proto_json()
        && let Ok(bytes) = serde_json::to_vec(&value)
    {
        return bytes;
    }
    if let Ok(bytes) = serde_json::to_vec(message) {
        return bytes;
    }
    UNSERIALIZABLE.as_bytes().to_vec()
}
