//! Validated app identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Maximum length of an app identifier in bytes.
const MAX_ID_LEN: usize = 128;

/// A validated app identifier.
///
/// App identifiers are reverse-DNS style: dot-separated segments of
/// lowercase ASCII letters, digits, `_`, and `-`. They double as on-disk
/// directory names under the apps directory, so validation also guards
/// against path traversal from crafted manifests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AppId(String);

/// Deserialize with validation — rejects malformed IDs (e.g. path traversal
/// payloads in crafted manifests or install notifications).
impl<'de> Deserialize<'de> for AppId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl AppId {
    /// Create a new `AppId`, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidId`] if the ID is empty, too long, or
    /// contains invalid characters.
    pub fn new(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create an `AppId` without validation (for tests and internal use).
    #[must_use]
    pub fn from_static(id: &str) -> Self {
        Self(id.to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a string is a valid app ID without constructing one.
    #[must_use]
    pub fn is_valid(id: &str) -> bool {
        Self::validate(id).is_ok()
    }

    /// Validate that an app ID string is well-formed.
    fn validate(id: &str) -> CoreResult<()> {
        if id.is_empty() {
            return Err(CoreError::InvalidId("app id must not be empty".into()));
        }
        if id.len() > MAX_ID_LEN {
            return Err(CoreError::InvalidId(format!(
                "app id exceeds {MAX_ID_LEN} bytes: {id}"
            )));
        }
        for segment in id.split('.') {
            if segment.is_empty() {
                return Err(CoreError::InvalidId(format!(
                    "app id has an empty segment: {id}"
                )));
            }
            if !segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
            {
                return Err(CoreError::InvalidId(format!(
                    "app id segment '{segment}' contains invalid characters"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AppId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for AppId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        assert!(AppId::new("com.example.weather").is_ok());
        assert!(AppId::new("weather").is_ok());
        assert!(AppId::new("io.nebo.search-2").is_ok());
        assert!(AppId::new("a_b.c-d.e0").is_ok());
    }

    #[test]
    fn test_rejects_empty() {
        assert!(AppId::new("").is_err());
        assert!(AppId::new("com..example").is_err());
        assert!(AppId::new(".leading").is_err());
    }

    #[test]
    fn test_rejects_path_traversal() {
        assert!(AppId::new("../escape").is_err());
        assert!(AppId::new("com/example").is_err());
        assert!(AppId::new("com.example/..").is_err());
    }

    #[test]
    fn test_rejects_uppercase_and_spaces() {
        assert!(AppId::new("Com.Example").is_err());
        assert!(AppId::new("has space").is_err());
    }

    #[test]
    fn test_rejects_overlong() {
        let long = "a".repeat(129);
        assert!(AppId::new(long).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<AppId, _> = serde_json::from_str("\"com.example.app\"");
        assert!(ok.is_ok());
        let bad: Result<AppId, _> = serde_json::from_str("\"../../etc\"");
        assert!(bad.is_err());
    }
}
