//! Core error types.

use std::path::PathBuf;

/// Errors from core type validation and configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The app identifier is malformed.
    #[error("invalid app id: {0}")]
    InvalidId(String),

    /// A permission string failed to parse.
    #[error("invalid permission '{value}': {reason}")]
    InvalidPermission {
        /// The offending string.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A capability string failed to parse.
    #[error("invalid capability: {0}")]
    InvalidCapability(String),

    /// The manifest failed validation.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Failed to parse a manifest file.
    #[error("manifest parse error in {path}: {message}")]
    ManifestParse {
        /// Path to the manifest file.
        path: PathBuf,
        /// Parse error message.
        message: String,
    },

    /// Failed to load or parse the platform configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A capability call across a host contract failed.
    #[error("capability call failed: {0}")]
    CapabilityCall(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
