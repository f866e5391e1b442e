//! The hook-point vocabulary.
//!
//! Hook points are the well-known junctions of the agent loop an app can
//! subscribe to. The set is closed: registering an unknown name is
//! ignored with a warning by the dispatcher.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Effective priority when a subscription declares 0.
pub const DEFAULT_HOOK_PRIORITY: i32 = 10;

/// A well-known junction of the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookPoint {
    /// Before a tool executes.
    ToolPreExecute,
    /// After a tool executes.
    ToolPostExecute,
    /// Before an outbound message is sent.
    MessagePreSend,
    /// After an inbound message is received.
    MessagePostReceive,
    /// Before a memory is stored.
    MemoryPreStore,
    /// Before memories are recalled.
    MemoryPreRecall,
    /// When an entry is appended to the session transcript.
    SessionAppend,
    /// When prompt sections are assembled.
    PromptSections,
    /// When a steering directive is applied.
    Steering,
    /// For each chunk of a streaming response.
    ResponseStream,
}

impl HookPoint {
    /// All hook points, in declaration order.
    pub const ALL: &'static [Self] = &[
        Self::ToolPreExecute,
        Self::ToolPostExecute,
        Self::MessagePreSend,
        Self::MessagePostReceive,
        Self::MemoryPreStore,
        Self::MemoryPreRecall,
        Self::SessionAppend,
        Self::PromptSections,
        Self::Steering,
        Self::ResponseStream,
    ];

    /// The wire/manifest name of this hook point.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolPreExecute => "tool.pre_execute",
            Self::ToolPostExecute => "tool.post_execute",
            Self::MessagePreSend => "message.pre_send",
            Self::MessagePostReceive => "message.post_receive",
            Self::MemoryPreStore => "memory.pre_store",
            Self::MemoryPreRecall => "memory.pre_recall",
            Self::SessionAppend => "session.append",
            Self::PromptSections => "prompt.sections",
            Self::Steering => "steering",
            Self::ResponseStream => "response.stream",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookPoint {
    type Err = UnknownHookPoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|h| h.as_str() == s)
            .ok_or_else(|| UnknownHookPoint(s.to_string()))
    }
}

/// The hook name is not in the closed set.
#[derive(Debug, thiserror::Error)]
#[error("unknown hook point: {0}")]
pub struct UnknownHookPoint(pub String);

/// How a subscription participates in dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    /// Payload-transforming, sequential, may short-circuit.
    Filter,
    /// Fire-and-forget, failures don't stop the chain.
    Action,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filter => f.write_str("filter"),
            Self::Action => f.write_str("action"),
        }
    }
}

/// A hook subscription declared in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookSpec {
    /// Hook-point name. Validated against the closed set at registration,
    /// not at parse time, so one bad entry doesn't reject the manifest.
    pub name: String,
    /// Filter or action.
    #[serde(rename = "type")]
    pub kind: HookKind,
    /// Lower runs first; 0 means [`DEFAULT_HOOK_PRIORITY`].
    #[serde(default)]
    pub priority: i32,
}

impl HookSpec {
    /// The effective priority (0 maps to the default).
    #[must_use]
    pub fn effective_priority(&self) -> i32 {
        if self.priority == 0 {
            DEFAULT_HOOK_PRIORITY
        } else {
            self.priority
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for point in HookPoint::ALL {
            let parsed: HookPoint = point.as_str().parse().unwrap();
            assert_eq!(parsed, *point);
        }
    }

    #[test]
    fn test_unknown_rejected() {
        assert!("tool.mid_execute".parse::<HookPoint>().is_err());
        assert!("".parse::<HookPoint>().is_err());
    }

    #[test]
    fn test_spec_priority_default() {
        let spec: HookSpec =
            serde_json::from_str(r#"{"name": "tool.pre_execute", "type": "filter"}"#).unwrap();
        assert_eq!(spec.priority, 0);
        assert_eq!(spec.effective_priority(), DEFAULT_HOOK_PRIORITY);

        let spec: HookSpec =
            serde_json::from_str(r#"{"name": "steering", "type": "action", "priority": 5}"#)
                .unwrap();
        assert_eq!(spec.effective_priority(), 5);
    }
}
