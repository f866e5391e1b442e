//! Runtime error types.

use std::time::Duration;

use nebo_core::AppId;

/// Errors from app process lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Manifest or other core validation failure.
    #[error(transparent)]
    Core(#[from] nebo_core::CoreError),

    /// Binary vetting or package layout failure.
    #[error(transparent)]
    Package(#[from] nebo_package::PackageError),

    /// Signature verification failure.
    #[error(transparent)]
    Crypto(#[from] nebo_crypto::CryptoError),

    /// The app is on the revocation list.
    #[error("app is revoked: {0}")]
    Revoked(AppId),

    /// The app never opened its socket within the startup timeout.
    #[error("startup timeout for {app_id}: socket not ready after {waited:?}")]
    StartupTimeout {
        /// The app that timed out.
        app_id: AppId,
        /// How long the runtime waited.
        waited: Duration,
    },

    /// Failed to spawn the app process.
    #[error("spawn failed for {app_id}: {message}")]
    SpawnFailed {
        /// The app that failed to start.
        app_id: AppId,
        /// OS error detail.
        message: String,
    },

    /// Failed to dial the app's gRPC socket.
    #[error("gRPC connect failed for {app_id}: {message}")]
    ConnectFailed {
        /// The app whose socket failed.
        app_id: AppId,
        /// Transport error detail.
        message: String,
    },

    /// The app answered its health check with `healthy = false`.
    #[error("app {app_id} reported unhealthy via {capability}: {message}")]
    HealthUnhealthy {
        /// The app.
        app_id: AppId,
        /// The capability client that was probed.
        capability: &'static str,
        /// The app's own message.
        message: String,
    },

    /// The health check failed at the transport layer.
    #[error("health check transport failure for {app_id} via {capability}: {message}")]
    HealthTransport {
        /// The app.
        app_id: AppId,
        /// The capability client that was probed.
        capability: &'static str,
        /// Status or timeout detail.
        message: String,
    },

    /// No process record exists for the app.
    #[error("no process record for {0}")]
    NotRunning(AppId),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
