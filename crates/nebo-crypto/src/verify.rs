//! Package verification.
//!
//! Verification order, failing fast on the first mismatch:
//!
//! 1. Load and validate the signatures record.
//! 2. Compare its key id against the server's current key id.
//! 3. Decode the public key (must be exactly ed25519-sized).
//! 4. Verify the manifest signature over the raw manifest bytes.
//! 5. Compare the binary's SHA-256 digest against the stored digest.
//! 6. Verify the binary signature over the raw binary bytes.
//!
//! On a verification failure the verifier retries exactly once with a
//! force-refreshed key, which handles key rotation windows.

use std::path::Path;
use std::sync::Arc;

use ed25519_dalek::Verifier as _;
use sha2::Digest as _;
use tracing::{debug, warn};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{KeySource, SigningKeyRecord};
use crate::signatures::SignaturesRecord;

/// Verifies package signatures against the upstream signing key.
pub struct PackageVerifier {
    keys: Arc<dyn KeySource>,
}

impl PackageVerifier {
    /// Create a verifier backed by the given key source.
    #[must_use]
    pub fn new(keys: Arc<dyn KeySource>) -> Self {
        Self { keys }
    }

    /// Verify the package in `app_dir` whose binary is at `binary_path`.
    ///
    /// Reads `manifest.json` and `signatures.json` verbatim from
    /// `app_dir`.
    ///
    /// # Errors
    ///
    /// Returns the first failing check; see [`CryptoError`] for kinds.
    pub async fn verify_dir(&self, app_dir: &Path, binary_path: &Path) -> CryptoResult<()> {
        let record = SignaturesRecord::load(app_dir)?;
        let manifest_bytes = std::fs::read(app_dir.join("manifest.json"))?;
        let binary_bytes = std::fs::read(binary_path)?;

        let key = self.keys.signing_key(false).await?;
        match verify_package(&record, &key, &manifest_bytes, &binary_bytes) {
            Ok(()) => Ok(()),
            Err(e) if is_retryable(&e) => {
                // The cached key may predate a rotation. One forced refresh.
                warn!(error = %e, "Verification failed, refreshing signing key once");
                let key = self.keys.signing_key(true).await?;
                verify_package(&record, &key, &manifest_bytes, &binary_bytes)
            },
            Err(e) => Err(e),
        }
    }
}

/// A single force-refresh is only useful for failures a newer key could
/// explain. Tamper evidence (digest mismatch) is final.
fn is_retryable(error: &CryptoError) -> bool {
    matches!(
        error,
        CryptoError::KeyIdMismatch { .. }
            | CryptoError::ManifestSignatureMismatch
            | CryptoError::BinarySignatureMismatch
    )
}

/// The pure verification core (steps 1–6), independent of key fetching.
///
/// # Errors
///
/// Returns the first failing check; see [`CryptoError`] for kinds.
pub fn verify_package(
    record: &SignaturesRecord,
    key: &SigningKeyRecord,
    manifest_bytes: &[u8],
    binary_bytes: &[u8],
) -> CryptoResult<()> {
    record.validate()?;

    if record.key_id != key.key_id {
        return Err(CryptoError::KeyIdMismatch {
            record: record.key_id.clone(),
            server: key.key_id.clone(),
        });
    }

    let verifying_key = key.verifying_key()?;

    let manifest_sig = decode_signature(&record.manifest_signature, "manifest_signature")?;
    verifying_key
        .verify(manifest_bytes, &manifest_sig)
        .map_err(|_| CryptoError::ManifestSignatureMismatch)?;
    debug!(key_id = %key.key_id, "Manifest signature verified");

    let actual = hex::encode(sha2::Sha256::digest(binary_bytes));
    if !actual.eq_ignore_ascii_case(&record.binary_sha256) {
        return Err(CryptoError::BinaryTampered {
            expected: record.binary_sha256.clone(),
            actual,
        });
    }

    let binary_sig = decode_signature(&record.binary_signature, "binary_signature")?;
    verifying_key
        .verify(binary_bytes, &binary_sig)
        .map_err(|_| CryptoError::BinarySignatureMismatch)?;
    debug!(key_id = %key.key_id, "Binary signature verified");

    Ok(())
}

fn decode_signature(b64: &str, field: &'static str) -> CryptoResult<ed25519_dalek::Signature> {
    use base64::Engine as _;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| CryptoError::Base64 {
            field,
            message: e.to_string(),
        })?;
    let bytes: [u8; ed25519_dalek::SIGNATURE_LENGTH] =
        bytes.try_into().map_err(|_| CryptoError::Base64 {
            field,
            message: format!("expected {} bytes", ed25519_dalek::SIGNATURE_LENGTH),
        })?;
    Ok(ed25519_dalek::Signature::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use ed25519_dalek::Signer as _;
    use rand::rngs::OsRng;

    use super::*;

    fn signed_fixture(manifest: &[u8], binary: &[u8]) -> (SignaturesRecord, SigningKeyRecord) {
        let keypair = ed25519_dalek::SigningKey::generate(&mut OsRng);
        let b64 = base64::engine::general_purpose::STANDARD;

        let record = SignaturesRecord {
            key_id: "key-1".into(),
            algorithm: "ed25519".into(),
            binary_sha256: hex::encode(sha2::Sha256::digest(binary)),
            binary_signature: b64.encode(keypair.sign(binary).to_bytes()),
            manifest_signature: b64.encode(keypair.sign(manifest).to_bytes()),
        };
        let key = SigningKeyRecord {
            algorithm: "ed25519".into(),
            key_id: "key-1".into(),
            public_key: b64.encode(keypair.verifying_key().as_bytes()),
        };
        (record, key)
    }

    #[test]
    fn test_valid_package_verifies() {
        let manifest = br#"{"id": "com.example.a"}"#;
        let binary = b"\x7fELF fake binary";
        let (record, key) = signed_fixture(manifest, binary);
        assert!(verify_package(&record, &key, manifest, binary).is_ok());
    }

    #[test]
    fn test_flipped_manifest_bit_fails() {
        let manifest = br#"{"id": "com.example.a"}"#;
        let binary = b"\x7fELF fake binary";
        let (record, key) = signed_fixture(manifest, binary);

        let mut tampered = manifest.to_vec();
        tampered[0] ^= 1;
        assert!(matches!(
            verify_package(&record, &key, &tampered, binary),
            Err(CryptoError::ManifestSignatureMismatch)
        ));
    }

    #[test]
    fn test_flipped_binary_bit_fails_as_tampered() {
        let manifest = br#"{"id": "com.example.a"}"#;
        let binary = b"\x7fELF fake binary";
        let (record, key) = signed_fixture(manifest, binary);

        let mut tampered = binary.to_vec();
        tampered[3] ^= 1;
        assert!(matches!(
            verify_package(&record, &key, manifest, &tampered),
            Err(CryptoError::BinaryTampered { .. })
        ));
    }

    #[test]
    fn test_flipped_binary_signature_fails() {
        let manifest = br#"{"id": "com.example.a"}"#;
        let binary = b"\x7fELF fake binary";
        let (mut record, key) = signed_fixture(manifest, binary);

        let b64 = base64::engine::general_purpose::STANDARD;
        let mut sig = b64.decode(&record.binary_signature).unwrap();
        sig[10] ^= 1;
        record.binary_signature = b64.encode(sig);

        assert!(matches!(
            verify_package(&record, &key, manifest, binary),
            Err(CryptoError::BinarySignatureMismatch)
        ));
    }

    #[test]
    fn test_flipped_manifest_signature_fails() {
        let manifest = br#"{"id": "com.example.a"}"#;
        let binary = b"\x7fELF fake binary";
        let (mut record, key) = signed_fixture(manifest, binary);

        let b64 = base64::engine::general_purpose::STANDARD;
        let mut sig = b64.decode(&record.manifest_signature).unwrap();
        sig[10] ^= 1;
        record.manifest_signature = b64.encode(sig);

        assert!(matches!(
            verify_package(&record, &key, manifest, binary),
            Err(CryptoError::ManifestSignatureMismatch)
        ));
    }

    #[test]
    fn test_key_id_mismatch() {
        let manifest = b"m";
        let binary = b"b";
        let (record, mut key) = signed_fixture(manifest, binary);
        key.key_id = "key-2".into();
        assert!(matches!(
            verify_package(&record, &key, manifest, binary),
            Err(CryptoError::KeyIdMismatch { .. })
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let manifest = b"m";
        let binary = b"b";
        let (record, _) = signed_fixture(manifest, binary);
        // A different keypair under the same key id.
        let (_, other_key) = signed_fixture(manifest, binary);
        assert!(verify_package(&record, &other_key, manifest, binary).is_err());
    }

    struct RotatingKeys {
        stale: SigningKeyRecord,
        fresh: SigningKeyRecord,
    }

    #[async_trait::async_trait]
    impl KeySource for RotatingKeys {
        async fn signing_key(&self, force: bool) -> CryptoResult<SigningKeyRecord> {
            Ok(if force {
                self.fresh.clone()
            } else {
                self.stale.clone()
            })
        }
    }

    #[tokio::test]
    async fn test_force_refresh_handles_rotation() {
        let manifest = br#"{"id": "com.example.a"}"#;
        let binary = b"\x7fELF fake binary";
        let (record, fresh_key) = signed_fixture(manifest, binary);
        let (_, stale_key) = {
            let mut pair = signed_fixture(manifest, binary);
            pair.1.key_id = "key-0".into();
            pair
        };

        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("manifest.json"), manifest).unwrap();
        let binary_path = tmp.path().join("binary");
        std::fs::write(&binary_path, binary).unwrap();
        std::fs::write(
            tmp.path().join("signatures.json"),
            serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();

        let verifier = PackageVerifier::new(std::sync::Arc::new(RotatingKeys {
            stale: stale_key,
            fresh: fresh_key,
        }));
        verifier.verify_dir(tmp.path(), &binary_path).await.unwrap();
    }
}
