//! Registry error types.

use nebo_core::AppId;

/// Errors from registry, install, and supervision operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Core type or manifest failure.
    #[error(transparent)]
    Core(#[from] nebo_core::CoreError),

    /// Launch/stop failure.
    #[error(transparent)]
    Runtime(#[from] nebo_runtime::RuntimeError),

    /// Extraction or binary vetting failure.
    #[error(transparent)]
    Package(#[from] nebo_package::PackageError),

    /// Verification or revocation failure.
    #[error(transparent)]
    Crypto(#[from] nebo_crypto::CryptoError),

    /// Install refused: the app is already installed.
    #[error("app already installed: {0}")]
    AlreadyInstalled(AppId),

    /// The app is not installed.
    #[error("app not installed: {0}")]
    NotInstalled(AppId),

    /// No download URL was provided and no API base is configured.
    #[error("no download URL for {0}")]
    NoDownloadUrl(AppId),

    /// The package download exceeded the size cap.
    #[error("download too large: exceeds {limit} bytes")]
    DownloadTooLarge {
        /// The cap that was exceeded.
        limit: u64,
    },

    /// The package download failed.
    #[error("download failed: {0}")]
    Download(String),

    /// Status-store failure.
    #[error("status store error: {0}")]
    Store(String),

    /// Sideload validation or build failure.
    #[error("sideload failed: {0}")]
    Sideload(String),

    /// Filesystem watcher failure.
    #[error("watcher error: {0}")]
    Watch(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
