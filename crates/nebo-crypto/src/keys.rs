//! Signing-key provider with a 24-hour read-through cache.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{CryptoError, CryptoResult};

/// How long a fetched key stays fresh.
const KEY_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// The signing key served by the upstream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    /// Signature algorithm; must be `ed25519`.
    pub algorithm: String,
    /// Key identifier, matched against signatures records.
    pub key_id: String,
    /// Base64 ed25519 public key.
    pub public_key: String,
}

impl SigningKeyRecord {
    /// Decode the base64 public key into a dalek verifying key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if the key is not valid
    /// base64 or not exactly the ed25519 public key size.
    pub fn verifying_key(&self) -> CryptoResult<ed25519_dalek::VerifyingKey> {
        use base64::Engine as _;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.public_key)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        let bytes: [u8; ed25519_dalek::PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey(format!(
                "expected {} bytes",
                ed25519_dalek::PUBLIC_KEY_LENGTH
            ))
        })?;
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }
}

/// Source of the current signing key.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// The current signing key. `force` bypasses the cache (used once on
    /// verification failure to handle key rotation).
    async fn signing_key(&self, force: bool) -> CryptoResult<SigningKeyRecord>;
}

struct CachedKey {
    record: SigningKeyRecord,
    fetched_at: Instant,
}

/// Fetches the signing key over HTTP and caches it for 24 hours.
pub struct HttpKeyProvider {
    http: reqwest::Client,
    url: String,
    cache: RwLock<Option<CachedKey>>,
}

impl HttpKeyProvider {
    /// Create a provider fetching from `url` with the given short-timeout
    /// client (shared with the revocation checker).
    #[must_use]
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            cache: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> CryptoResult<SigningKeyRecord> {
        debug!(url = %self.url, "Fetching signing key");
        let response = self.http.get(&self.url).send().await?.error_for_status()?;
        let record: SigningKeyRecord = response
            .json()
            .await
            .map_err(|e| CryptoError::MalformedResponse(e.to_string()))?;
        if !record.algorithm.eq_ignore_ascii_case("ed25519") {
            return Err(CryptoError::UnsupportedAlgorithm(record.algorithm));
        }
        info!(key_id = %record.key_id, "Fetched signing key");
        Ok(record)
    }
}

#[async_trait]
impl KeySource for HttpKeyProvider {
    async fn signing_key(&self, force: bool) -> CryptoResult<SigningKeyRecord> {
        if !force {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.fetched_at.elapsed() < KEY_CACHE_TTL
            {
                return Ok(cached.record.clone());
            }
        }

        let record = self.fetch().await?;
        let mut cache = self.cache.write().await;
        *cache = Some(CachedKey {
            record: record.clone(),
            fetched_at: Instant::now(),
        });
        Ok(record)
    }
}
