//! Package extraction and binary vetting.
//!
//! Consumes `.napp` archives (gzip-compressed tar) under a strict file
//! allowlist with per-file size caps, and performs the fast pre-launch
//! veto on app binaries (format magic, exec bit, size). Deeper binary
//! analysis is the packager's responsibility.

pub mod binfmt;
pub mod error;
pub mod extract;

pub use binfmt::{locate_binary, validate_binary};
pub use error::{PackageError, PackageResult};
pub use extract::extract_package;
