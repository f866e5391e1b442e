//! Install, registry, and supervisor event payloads.
//!
//! Observers subscribe via `tokio::sync::broadcast`; publishers never
//! block on a slow observer.

use serde::{Deserialize, Serialize};

use crate::id::AppId;

/// Kind of an upstream install notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallEventKind {
    /// A new app was installed upstream.
    AppInstalled,
    /// An installed app has a new version.
    AppUpdated,
    /// The app was uninstalled upstream.
    AppUninstalled,
    /// The app was revoked by the publisher registry.
    AppRevoked,
}

/// An install notification from the upstream notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallEvent {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: InstallEventKind,
    /// The app concerned.
    pub app_id: AppId,
    /// Version the event refers to.
    pub version: String,
    /// Direct download URL; when absent the pipeline derives one from the
    /// configured API base.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Optional settings schema shipped with the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_schema: Option<serde_json::Value>,
}

/// Events published by the registry for observers (UI, operator log).
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// An app was installed and launched.
    Installed {
        /// The app.
        app_id: AppId,
        /// Installed version.
        version: String,
    },
    /// An app was updated in place.
    Updated {
        /// The app.
        app_id: AppId,
        /// New version.
        version: String,
    },
    /// An update was staged to `.pending` because it adds permissions;
    /// the old version keeps running until the operator approves.
    UpdateHeld {
        /// The app.
        app_id: AppId,
        /// Staged version.
        version: String,
        /// The permissions the new version adds.
        added_permissions: Vec<String>,
    },
    /// An app was uninstalled.
    Uninstalled {
        /// The app.
        app_id: AppId,
    },
    /// An app was quarantined: process stopped, binary removed, data kept.
    Quarantined {
        /// The app.
        app_id: AppId,
    },
    /// An install or update failed.
    InstallFailed {
        /// The app.
        app_id: AppId,
        /// What went wrong.
        error: String,
    },
}

/// Events published by the supervisor.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A restart was attempted.
    Restarted {
        /// The app.
        app_id: AppId,
        /// Restart count within the current window.
        attempt: u32,
        /// Whether the relaunch succeeded.
        success: bool,
    },
    /// The restart budget is exhausted; capabilities were deregistered.
    GaveUp {
        /// The app.
        app_id: AppId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_event_wire_format() {
        let json = r#"{
            "type": "app_updated",
            "app_id": "com.example.weather",
            "version": "2.0.0",
            "download_url": "https://apps.example.com/weather.napp"
        }"#;
        let event: InstallEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, InstallEventKind::AppUpdated);
        assert_eq!(event.app_id.as_str(), "com.example.weather");
        assert!(event.settings_schema.is_none());
    }

    #[test]
    fn test_install_event_rejects_bad_id() {
        let json = r#"{"type": "app_installed", "app_id": "../evil", "version": "1.0.0"}"#;
        assert!(serde_json::from_str::<InstallEvent>(json).is_err());
    }
}
