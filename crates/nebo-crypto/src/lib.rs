//! Package signature verification and revocation checking.
//!
//! Packages ship a `signatures.json` beside the manifest: an ed25519
//! signature over the raw manifest bytes, a SHA-256 digest of the binary,
//! and an ed25519 signature over the raw binary bytes. The signing key is
//! fetched from the upstream service and cached for 24 hours; the
//! revocation list is cached for one hour and refreshed lazily.
//!
//! Verification only — the platform never generates keys outside tests.

pub mod error;
pub mod keys;
pub mod revocation;
pub mod signatures;
pub mod verify;

pub use error::{CryptoError, CryptoResult};
pub use keys::{HttpKeyProvider, KeySource, SigningKeyRecord};
pub use revocation::{HttpRevocationChecker, RevocationCheck};
pub use signatures::SignaturesRecord;
pub use verify::PackageVerifier;
