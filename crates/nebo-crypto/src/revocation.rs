//! Revocation list with a one-hour read-through cache.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use nebo_core::AppId;

use crate::error::{CryptoError, CryptoResult};

/// How long a fetched revocation list stays fresh.
const REVOCATION_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Checks whether an app id has been revoked by the publisher registry.
#[async_trait]
pub trait RevocationCheck: Send + Sync {
    /// Whether `id` is revoked, refreshing the list lazily when stale.
    async fn is_revoked(&self, id: &AppId) -> CryptoResult<bool>;
}

#[derive(Debug, Deserialize)]
struct RevocationEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RevocationResponse {
    #[serde(default)]
    revocations: Vec<RevocationEntry>,
}

struct CachedList {
    revoked: HashSet<String>,
    fetched_at: Instant,
}

/// Fetches `{revocations: [{id, …}]}` over HTTP, caching for one hour.
pub struct HttpRevocationChecker {
    http: reqwest::Client,
    url: String,
    cache: RwLock<Option<CachedList>>,
}

impl HttpRevocationChecker {
    /// Create a checker fetching from `url` with the given short-timeout
    /// client (shared with the key provider).
    #[must_use]
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            cache: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> CryptoResult<HashSet<String>> {
        debug!(url = %self.url, "Fetching revocation list");
        let response = self.http.get(&self.url).send().await?.error_for_status()?;
        let parsed: RevocationResponse = response
            .json()
            .await
            .map_err(|e| CryptoError::MalformedResponse(e.to_string()))?;
        let revoked: HashSet<String> = parsed.revocations.into_iter().map(|e| e.id).collect();
        info!(count = revoked.len(), "Fetched revocation list");
        Ok(revoked)
    }
}

#[async_trait]
impl RevocationCheck for HttpRevocationChecker {
    async fn is_revoked(&self, id: &AppId) -> CryptoResult<bool> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.fetched_at.elapsed() < REVOCATION_CACHE_TTL
            {
                return Ok(cached.revoked.contains(id.as_str()));
            }
        }

        let revoked = self.fetch().await?;
        let hit = revoked.contains(id.as_str());
        let mut cache = self.cache.write().await;
        *cache = Some(CachedList {
            revoked,
            fetched_at: Instant::now(),
        });
        Ok(hit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let json = r#"{"revocations": [{"id": "com.example.bad", "reason": "malware"}]}"#;
        let parsed: RevocationResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.revocations.len(), 1);
        assert_eq!(parsed.revocations[0].id, "com.example.bad");
    }

    #[test]
    fn test_response_parsing_empty() {
        let parsed: RevocationResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.revocations.is_empty());
    }
}
