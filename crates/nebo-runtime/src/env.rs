//! Child-process environment sanitization.
//!
//! Apps see exactly six host-defined variables plus a strict allowlist of
//! system variables. Everything else in the parent environment is
//! stripped — this is the primary credential-leakage defense.

use std::collections::HashMap;
use std::path::Path;

use nebo_core::Manifest;

/// The app's installation directory.
pub const ENV_APP_DIR: &str = "NEBO_APP_DIR";
/// The app's unix socket path.
pub const ENV_APP_SOCK: &str = "NEBO_APP_SOCK";
/// The app's identifier.
pub const ENV_APP_ID: &str = "NEBO_APP_ID";
/// The app's display name.
pub const ENV_APP_NAME: &str = "NEBO_APP_NAME";
/// The app's version.
pub const ENV_APP_VERSION: &str = "NEBO_APP_VERSION";
/// The app's data directory.
pub const ENV_APP_DATA: &str = "NEBO_APP_DATA";

/// System variables passed through from the parent when present.
const SYSTEM_ALLOWLIST: &[&str] = &["PATH", "HOME", "TMPDIR", "LANG", "LC_ALL", "TZ"];

/// Build the sanitized environment for an app process from the host's
/// own environment. Pair with `Command::env_clear()` so nothing else
/// leaks through.
#[must_use]
pub fn sandbox_env(
    manifest: &Manifest,
    app_dir: &Path,
    socket_path: &Path,
    data_dir: &Path,
) -> HashMap<String, String> {
    sandbox_env_from(
        manifest,
        app_dir,
        socket_path,
        data_dir,
        std::env::vars().collect(),
    )
}

/// [`sandbox_env`] against an explicit parent environment.
#[must_use]
pub fn sandbox_env_from(
    manifest: &Manifest,
    app_dir: &Path,
    socket_path: &Path,
    data_dir: &Path,
    parent: HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert(ENV_APP_DIR.into(), app_dir.display().to_string());
    env.insert(ENV_APP_SOCK.into(), socket_path.display().to_string());
    env.insert(ENV_APP_ID.into(), manifest.id.to_string());
    env.insert(ENV_APP_NAME.into(), manifest.name.clone());
    env.insert(ENV_APP_VERSION.into(), manifest.version.clone());
    env.insert(ENV_APP_DATA.into(), data_dir.display().to_string());

    for key in SYSTEM_ALLOWLIST {
        if let Some(value) = parent.get(*key) {
            env.insert((*key).into(), value.clone());
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        let json = serde_json::json!({
            "id": "com.example.weather",
            "name": "Weather",
            "version": "1.0.0"
        });
        Manifest::from_slice(&serde_json::to_vec(&json).unwrap()).unwrap()
    }

    fn build(parent: HashMap<String, String>) -> HashMap<String, String> {
        sandbox_env_from(
            &manifest(),
            Path::new("/srv/apps/com.example.weather"),
            Path::new("/srv/apps/com.example.weather/app.sock"),
            Path::new("/srv/data/com.example.weather"),
            parent,
        )
    }

    #[test]
    fn test_app_variables_present() {
        let env = build(HashMap::new());
        assert_eq!(env[ENV_APP_ID], "com.example.weather");
        assert_eq!(env[ENV_APP_NAME], "Weather");
        assert_eq!(env[ENV_APP_VERSION], "1.0.0");
        assert_eq!(env[ENV_APP_DIR], "/srv/apps/com.example.weather");
        assert_eq!(env[ENV_APP_SOCK], "/srv/apps/com.example.weather/app.sock");
        assert_eq!(env[ENV_APP_DATA], "/srv/data/com.example.weather");
    }

    #[test]
    fn test_parent_secrets_stripped() {
        let parent = HashMap::from([
            ("AWS_SECRET_ACCESS_KEY".to_string(), "hunter2".to_string()),
            ("OPENAI_API_KEY".to_string(), "sk-xyz".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ]);
        let env = build(parent);
        assert!(!env.contains_key("AWS_SECRET_ACCESS_KEY"));
        assert!(!env.contains_key("OPENAI_API_KEY"));
        assert_eq!(env.get("PATH").map(String::as_str), Some("/usr/bin"));
    }

    #[test]
    fn test_allowlist_passthrough() {
        let parent = HashMap::from([
            ("TZ".to_string(), "UTC".to_string()),
            ("LANG".to_string(), "en_US.UTF-8".to_string()),
            ("HOME".to_string(), "/home/nebo".to_string()),
        ]);
        let env = build(parent);
        assert_eq!(env.get("TZ").map(String::as_str), Some("UTC"));
        assert_eq!(env.get("LANG").map(String::as_str), Some("en_US.UTF-8"));
        assert_eq!(env.get("HOME").map(String::as_str), Some("/home/nebo"));
    }

    #[test]
    fn test_exactly_six_app_variables() {
        let env = build(HashMap::new());
        assert_eq!(env.len(), 6);
        assert!(env.keys().all(|k| k.starts_with("NEBO_APP_")));
    }
}
