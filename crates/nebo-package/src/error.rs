//! Package error types.

use std::path::PathBuf;

/// Errors from package extraction and binary vetting.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// Unsafe entry type in the archive (symlink, hardlink, device node).
    #[error("unsafe archive entry type '{entry_type}' at {path}")]
    UnsafeEntryType {
        /// The entry type that was rejected.
        entry_type: String,
        /// The path of the entry.
        path: String,
    },

    /// Path traversal detected in an archive entry.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path.
        path: String,
    },

    /// The entry's file name is not in the package allowlist.
    #[error("file not in package allowlist: {path}")]
    DisallowedEntry {
        /// The offending path.
        path: String,
    },

    /// An entry exceeds its size cap.
    #[error("file too large: {path} exceeds {limit} bytes")]
    FileTooLarge {
        /// The offending path.
        path: String,
        /// The cap that was exceeded.
        limit: u64,
    },

    /// A required package file is missing after extraction.
    #[error("package missing required file: {0}")]
    MissingFile(&'static str),

    /// Archive decompression or format failure.
    #[error("extraction error: {message}")]
    Extraction {
        /// Description of the failure.
        message: String,
    },

    /// The binary is a symlink.
    #[error("binary is a symlink: {0}")]
    BinaryIsSymlink(PathBuf),

    /// The binary is not a regular file.
    #[error("binary is not a regular file: {0}")]
    BinaryNotRegular(PathBuf),

    /// The binary has no executable bit.
    #[error("binary is not executable: {0}")]
    BinaryNotExecutable(PathBuf),

    /// The binary exceeds the configured size limit.
    #[error("binary too large: {path} is {size} bytes (limit: {limit})")]
    BinaryTooLarge {
        /// The binary path.
        path: PathBuf,
        /// Actual size in bytes.
        size: u64,
        /// Maximum allowed size in bytes.
        limit: u64,
    },

    /// The binary is an interpreter script (`#!`).
    #[error("binary is a script, not a native executable: {0}")]
    BinaryIsScript(PathBuf),

    /// The binary's leading bytes match no recognized native format.
    #[error("unrecognized binary format: {0}")]
    UnknownBinaryFormat(PathBuf),

    /// No binary was found in the app directory.
    #[error("no binary found in {0}")]
    BinaryNotFound(PathBuf),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for package operations.
pub type PackageResult<T> = Result<T, PackageError>;
