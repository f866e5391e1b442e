//! The app manifest.
//!
//! Every package carries a `manifest.json` at its root describing the
//! app's identity, runtime class, transport, declared capabilities,
//! declared permissions, and optional OAuth/settings/hook blocks.
//! Manifests are immutable for a given installed version.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::Capability;
use crate::error::{CoreError, CoreResult};
use crate::hook::HookSpec;
use crate::id::AppId;
use crate::permission::PermissionSet;

/// Upper bound on the declared startup timeout, in seconds.
const MAX_STARTUP_TIMEOUT_SECS: u64 = 120;

/// Startup timeout applied when the manifest declares 0.
const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Where an app's process runs. Only `local` is supported; the field is
/// reserved for future remote runtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeClass {
    /// A child process on this host.
    #[default]
    Local,
}

/// How the host talks to the app. Only gRPC is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// gRPC over a unix-domain socket in the app directory.
    #[default]
    Grpc,
}

/// OAuth requirements declared by an app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthRequirements {
    /// Provider identifier (e.g. `github`).
    pub provider: String,
    /// Requested scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// The settings block. Presence drives `Configurable` bridge
/// registration; the schema is an opaque map consumed by the host UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestSettings {
    /// JSON-schema-ish property map for the settings UI.
    #[serde(default)]
    pub schema: HashMap<String, serde_json::Value>,
}

/// An app manifest, loaded from `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Stable reverse-DNS identifier.
    pub id: AppId,
    /// Human-readable display name.
    pub name: String,
    /// Semantic version string.
    pub version: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Runtime class. Only `local` is supported.
    #[serde(default)]
    pub runtime: RuntimeClass,
    /// Transport. Only `grpc` is supported.
    #[serde(default)]
    pub transport: Transport,
    /// Seconds to wait for the app's socket at launch; 0 means 10.
    #[serde(default)]
    pub startup_timeout_secs: u64,
    /// Capabilities the app provides.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Permissions the app declares.
    #[serde(default)]
    pub permissions: PermissionSet,
    /// OAuth requirements, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OauthRequirements>,
    /// Hook subscriptions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<HookSpec>,
    /// Settings schema; presence enables the `Configurable` bridge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ManifestSettings>,
    /// Legacy embedded signature block. Parsed and ignored — real
    /// signatures live in `signatures.json` alongside the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<serde_json::Value>,
}

impl Manifest {
    /// Parse and validate a manifest from raw JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidManifest`] on validation failures and a
    /// parse error on malformed JSON.
    pub fn from_slice(bytes: &[u8]) -> CoreResult<Self> {
        let manifest: Self = serde_json::from_slice(bytes)
            .map_err(|e| CoreError::InvalidManifest(format!("malformed JSON: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load and validate `manifest.json` from an app directory or a direct
    /// file path.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a validation
    /// error per [`from_slice`](Self::from_slice).
    pub fn load(path: &Path) -> CoreResult<Self> {
        let file = if path.is_dir() {
            path.join("manifest.json")
        } else {
            path.to_path_buf()
        };
        let bytes = std::fs::read(&file)?;
        Self::from_slice(&bytes).map_err(|e| match e {
            CoreError::InvalidManifest(message) => CoreError::ManifestParse {
                path: file.clone(),
                message,
            },
            other => other,
        })
    }

    /// Validate cross-field constraints the serde layer can't express.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidManifest`] when a constraint fails.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidManifest("name must not be empty".into()));
        }
        validate_version(&self.version)?;
        if self.startup_timeout_secs > MAX_STARTUP_TIMEOUT_SECS {
            return Err(CoreError::InvalidManifest(format!(
                "startup_timeout_secs {} exceeds maximum {MAX_STARTUP_TIMEOUT_SECS}",
                self.startup_timeout_secs
            )));
        }
        Ok(())
    }

    /// The effective startup timeout (0 maps to the default).
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        let secs = if self.startup_timeout_secs == 0 {
            DEFAULT_STARTUP_TIMEOUT_SECS
        } else {
            self.startup_timeout_secs
        };
        Duration::from_secs(secs)
    }

    /// Whether the manifest declares the given capability.
    #[must_use]
    pub fn declares(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Whether any capability of the given family is declared
    /// (e.g. any `tool:<name>`).
    #[must_use]
    pub fn declares_any_tool(&self) -> bool {
        self.capabilities
            .iter()
            .any(|c| matches!(c, Capability::Tool(_)))
    }

    /// Whether any `channel:<type>` capability is declared.
    #[must_use]
    pub fn declares_any_channel(&self) -> bool {
        self.capabilities
            .iter()
            .any(|c| matches!(c, Capability::Channel(_)))
    }
}

/// Versions must start with a `major.minor.patch` numeric triple; a
/// pre-release/build tail after `-` or `+` is allowed.
fn validate_version(version: &str) -> CoreResult<()> {
    let core = version
        .split_once(['-', '+'])
        .map_or(version, |(head, _)| head);
    let mut parts = core.split('.');
    for _ in 0..3 {
        let part = parts.next().ok_or_else(|| {
            CoreError::InvalidManifest(format!("version '{version}' is not major.minor.patch"))
        })?;
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(CoreError::InvalidManifest(format!(
                "version '{version}' has non-numeric component '{part}'"
            )));
        }
    }
    if parts.next().is_some() {
        return Err(CoreError::InvalidManifest(format!(
            "version '{version}' has too many components"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> serde_json::Value {
        serde_json::json!({
            "id": "com.example.weather",
            "name": "Weather",
            "version": "1.2.3",
            "capabilities": ["gateway", "tool:forecast"],
            "permissions": ["network:api.weather.com:443"]
        })
    }

    #[test]
    fn test_parse_minimal() {
        let bytes = serde_json::to_vec(&minimal_json()).unwrap();
        let manifest = Manifest::from_slice(&bytes).unwrap();
        assert_eq!(manifest.id.as_str(), "com.example.weather");
        assert_eq!(manifest.runtime, RuntimeClass::Local);
        assert_eq!(manifest.transport, Transport::Grpc);
        assert_eq!(manifest.startup_timeout(), Duration::from_secs(10));
        assert!(manifest.declares(&Capability::Gateway));
        assert!(manifest.declares_any_tool());
        assert!(!manifest.declares_any_channel());
    }

    #[test]
    fn test_rejects_unknown_runtime() {
        let mut json = minimal_json();
        json["runtime"] = "remote".into();
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(Manifest::from_slice(&bytes).is_err());
    }

    #[test]
    fn test_rejects_bad_version() {
        for bad in ["1.2", "a.b.c", "1.2.3.4", ""] {
            let mut json = minimal_json();
            json["version"] = bad.into();
            let bytes = serde_json::to_vec(&json).unwrap();
            assert!(Manifest::from_slice(&bytes).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_accepts_prerelease_version() {
        let mut json = minimal_json();
        json["version"] = "1.2.3-rc.1".into();
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(Manifest::from_slice(&bytes).is_ok());
    }

    #[test]
    fn test_startup_timeout_clamped() {
        let mut json = minimal_json();
        json["startup_timeout_secs"] = 121.into();
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(Manifest::from_slice(&bytes).is_err());

        json["startup_timeout_secs"] = 30.into();
        let bytes = serde_json::to_vec(&json).unwrap();
        let manifest = Manifest::from_slice(&bytes).unwrap();
        assert_eq!(manifest.startup_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_bad_permission() {
        let mut json = minimal_json();
        json["permissions"] = serde_json::json!(["rocket:launch"]);
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(Manifest::from_slice(&bytes).is_err());
    }

    #[test]
    fn test_legacy_signature_block_ignored() {
        let mut json = minimal_json();
        json["signature"] = serde_json::json!({"alg": "ed25519", "sig": "deadbeef"});
        let bytes = serde_json::to_vec(&json).unwrap();
        let manifest = Manifest::from_slice(&bytes).unwrap();
        assert!(manifest.signature.is_some());
    }

    #[test]
    fn test_load_from_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = serde_json::to_vec(&minimal_json()).unwrap();
        std::fs::write(tmp.path().join("manifest.json"), bytes).unwrap();
        let manifest = Manifest::load(tmp.path()).unwrap();
        assert_eq!(manifest.name, "Weather");
    }

    #[test]
    fn test_hooks_block() {
        let mut json = minimal_json();
        json["capabilities"] = serde_json::json!(["hooks"]);
        json["hooks"] = serde_json::json!([
            {"name": "tool.pre_execute", "type": "filter", "priority": 5},
            {"name": "steering", "type": "action"}
        ]);
        let bytes = serde_json::to_vec(&json).unwrap();
        let manifest = Manifest::from_slice(&bytes).unwrap();
        assert_eq!(manifest.hooks.len(), 2);
        assert_eq!(manifest.hooks[0].effective_priority(), 5);
        assert_eq!(manifest.hooks[1].effective_priority(), 10);
    }
}
