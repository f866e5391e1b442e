//! The package signatures record.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

/// File name of the signatures record inside a package.
pub const SIGNATURES_FILE_NAME: &str = "signatures.json";

/// The `signatures.json` record shipped beside a package's manifest.
///
/// All signatures are over raw file bytes, exactly as extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignaturesRecord {
    /// Identifier of the signing key.
    pub key_id: String,
    /// Signature algorithm; must be `ed25519`.
    pub algorithm: String,
    /// Hex SHA-256 digest of the binary.
    #[serde(default)]
    pub binary_sha256: String,
    /// Base64 ed25519 signature over the raw binary bytes.
    #[serde(default)]
    pub binary_signature: String,
    /// Base64 ed25519 signature over the raw manifest bytes.
    #[serde(default)]
    pub manifest_signature: String,
}

impl SignaturesRecord {
    /// Parse a signatures record from raw JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedResponse`] on parse failure.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| CryptoError::MalformedResponse(e.to_string()))
    }

    /// Load `signatures.json` from an app directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file is missing or unreadable.
    pub fn load(app_dir: &Path) -> CryptoResult<Self> {
        let bytes = std::fs::read(app_dir.join(SIGNATURES_FILE_NAME))?;
        Self::from_slice(&bytes)
    }

    /// Assert the record is complete and names the supported algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnsupportedAlgorithm`] or
    /// [`CryptoError::MissingField`].
    pub fn validate(&self) -> CryptoResult<()> {
        if !self.algorithm.eq_ignore_ascii_case("ed25519") {
            return Err(CryptoError::UnsupportedAlgorithm(self.algorithm.clone()));
        }
        if self.binary_sha256.is_empty() {
            return Err(CryptoError::MissingField("binary_sha256"));
        }
        if self.binary_signature.is_empty() {
            return Err(CryptoError::MissingField("binary_signature"));
        }
        if self.manifest_signature.is_empty() {
            return Err(CryptoError::MissingField("manifest_signature"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SignaturesRecord {
        SignaturesRecord {
            key_id: "key-1".into(),
            algorithm: "ed25519".into(),
            binary_sha256: "ab".repeat(32),
            binary_signature: "c2ln".into(),
            manifest_signature: "c2ln".into(),
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(record().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_algorithm() {
        let mut r = record();
        r.algorithm = "rsa".into();
        assert!(matches!(
            r.validate(),
            Err(CryptoError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        for field in ["binary_sha256", "binary_signature", "manifest_signature"] {
            let mut r = record();
            match field {
                "binary_sha256" => r.binary_sha256.clear(),
                "binary_signature" => r.binary_signature.clear(),
                _ => r.manifest_signature.clear(),
            }
            assert!(matches!(r.validate(), Err(CryptoError::MissingField(f)) if f == field));
        }
    }

    #[test]
    fn test_load_from_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let json = serde_json::to_vec(&record()).unwrap();
        std::fs::write(tmp.path().join(SIGNATURES_FILE_NAME), json).unwrap();
        let loaded = SignaturesRecord::load(tmp.path()).unwrap();
        assert_eq!(loaded.key_id, "key-1");
    }
}
