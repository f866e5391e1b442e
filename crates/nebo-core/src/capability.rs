//! The capability vocabulary.
//!
//! Capabilities are the named services an app can provide: plain forms
//! (`gateway`, `comm`, …) and the parameterized families `tool:<name>`
//! and `channel:<type>`. A manifest's declared capabilities drive which
//! typed gRPC clients the runtime creates at launch and which adapters
//! the registry publishes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::permission::PermissionPrefix;

/// A capability an app declares in its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// AI gateway: chat completion streaming.
    Gateway,
    /// Vision analysis.
    Vision,
    /// Browser automation.
    Browser,
    /// Inter-agent comm plane endpoint.
    Comm,
    /// UI surface.
    Ui,
    /// Scheduling triggers.
    Schedule,
    /// Hook subscriptions.
    Hooks,
    /// A named tool, `tool:<name>`.
    Tool(String),
    /// A channel bridge of a given type, `channel:<type>`.
    Channel(String),
}

impl Capability {
    /// The permission prefix that must be declared for this capability's
    /// adapter to be created, if any.
    ///
    /// Only `gateway`, `comm`, `channel:*`, and `schedule` carry a floor;
    /// the rest are gated by manifest validity alone.
    #[must_use]
    pub fn permission_floor(&self) -> Option<PermissionPrefix> {
        match self {
            Self::Gateway => Some(PermissionPrefix::Network),
            Self::Comm => Some(PermissionPrefix::Comm),
            Self::Channel(_) => Some(PermissionPrefix::Channel),
            Self::Schedule => Some(PermissionPrefix::Schedule),
            Self::Vision | Self::Browser | Self::Ui | Self::Hooks | Self::Tool(_) => None,
        }
    }

    /// Whether this capability is served over the app's gRPC socket.
    ///
    /// Everything except `hooks` maps to a dedicated service; hooks use
    /// the dedicated hooks service driven by the dispatcher.
    #[must_use]
    pub fn is_parameterized(&self) -> bool {
        matches!(self, Self::Tool(_) | Self::Channel(_))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gateway => f.write_str("gateway"),
            Self::Vision => f.write_str("vision"),
            Self::Browser => f.write_str("browser"),
            Self::Comm => f.write_str("comm"),
            Self::Ui => f.write_str("ui"),
            Self::Schedule => f.write_str("schedule"),
            Self::Hooks => f.write_str("hooks"),
            Self::Tool(name) => write!(f, "tool:{name}"),
            Self::Channel(kind) => write!(f, "channel:{kind}"),
        }
    }
}

impl FromStr for Capability {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((family, param)) = s.split_once(':') {
            if param.is_empty() || !is_capability_param(param) {
                return Err(CoreError::InvalidCapability(s.to_string()));
            }
            return match family {
                "tool" => Ok(Self::Tool(param.to_string())),
                "channel" => Ok(Self::Channel(param.to_string())),
                _ => Err(CoreError::InvalidCapability(s.to_string())),
            };
        }
        match s {
            "gateway" => Ok(Self::Gateway),
            "vision" => Ok(Self::Vision),
            "browser" => Ok(Self::Browser),
            "comm" => Ok(Self::Comm),
            "ui" => Ok(Self::Ui),
            "schedule" => Ok(Self::Schedule),
            "hooks" => Ok(Self::Hooks),
            _ => Err(CoreError::InvalidCapability(s.to_string())),
        }
    }
}

fn is_capability_param(param: &str) -> bool {
    param
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'))
}

impl Serialize for Capability {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        assert_eq!("gateway".parse::<Capability>().unwrap(), Capability::Gateway);
        assert_eq!("hooks".parse::<Capability>().unwrap(), Capability::Hooks);
        assert!("telepathy".parse::<Capability>().is_err());
    }

    #[test]
    fn test_parse_parameterized() {
        assert_eq!(
            "tool:search".parse::<Capability>().unwrap(),
            Capability::Tool("search".into())
        );
        assert_eq!(
            "channel:slack".parse::<Capability>().unwrap(),
            Capability::Channel("slack".into())
        );
        assert!("tool:".parse::<Capability>().is_err());
        assert!("widget:thing".parse::<Capability>().is_err());
        assert!("tool:Has Space".parse::<Capability>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["gateway", "vision", "browser", "comm", "ui", "schedule", "hooks", "tool:web", "channel:slack"] {
            let cap: Capability = s.parse().unwrap();
            assert_eq!(cap.to_string(), s);
        }
    }

    #[test]
    fn test_permission_floor_set() {
        assert_eq!(
            Capability::Gateway.permission_floor(),
            Some(PermissionPrefix::Network)
        );
        assert_eq!(
            Capability::Comm.permission_floor(),
            Some(PermissionPrefix::Comm)
        );
        assert_eq!(
            Capability::Channel("slack".into()).permission_floor(),
            Some(PermissionPrefix::Channel)
        );
        assert_eq!(
            Capability::Schedule.permission_floor(),
            Some(PermissionPrefix::Schedule)
        );
        // The floor check gates exactly these four families.
        assert_eq!(Capability::Vision.permission_floor(), None);
        assert_eq!(Capability::Browser.permission_floor(), None);
        assert_eq!(Capability::Ui.permission_floor(), None);
        assert_eq!(Capability::Tool("web".into()).permission_floor(), None);
        assert_eq!(Capability::Hooks.permission_floor(), None);
    }

    #[test]
    fn test_serde() {
        let caps: Vec<Capability> = serde_json::from_str(r#"["gateway", "tool:search"]"#).unwrap();
        assert_eq!(caps.len(), 2);
        let json = serde_json::to_string(&caps).unwrap();
        assert_eq!(json, r#"["gateway","tool:search"]"#);
    }
}
