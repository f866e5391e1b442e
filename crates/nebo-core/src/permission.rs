//! The permission taxonomy.
//!
//! Permissions are `prefix:suffix` pairs with a closed prefix set. The
//! suffix `*` is a universal wildcard within a prefix. `network:` and
//! `oauth:` accept any identifier-style suffix (hostnames, ports,
//! provider names); every other prefix has an enumerated suffix set.
//! Permissions gate adapter creation at registration time — an app whose
//! manifest lacks the floor permission for a declared capability gets no
//! adapter for it.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// The closed set of permission prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PermissionPrefix {
    Network,
    Filesystem,
    Settings,
    Capability,
    Memory,
    Session,
    Context,
    Tool,
    Shell,
    Subagent,
    Lane,
    Channel,
    Comm,
    Notification,
    Embedding,
    Skill,
    Advisor,
    Model,
    Mcp,
    Database,
    Storage,
    Schedule,
    Voice,
    Browser,
    Oauth,
    User,
}

impl PermissionPrefix {
    /// All prefixes, in declaration order.
    pub const ALL: &'static [Self] = &[
        Self::Network,
        Self::Filesystem,
        Self::Settings,
        Self::Capability,
        Self::Memory,
        Self::Session,
        Self::Context,
        Self::Tool,
        Self::Shell,
        Self::Subagent,
        Self::Lane,
        Self::Channel,
        Self::Comm,
        Self::Notification,
        Self::Embedding,
        Self::Skill,
        Self::Advisor,
        Self::Model,
        Self::Mcp,
        Self::Database,
        Self::Storage,
        Self::Schedule,
        Self::Voice,
        Self::Browser,
        Self::Oauth,
        Self::User,
    ];

    /// The string form of this prefix.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Filesystem => "filesystem",
            Self::Settings => "settings",
            Self::Capability => "capability",
            Self::Memory => "memory",
            Self::Session => "session",
            Self::Context => "context",
            Self::Tool => "tool",
            Self::Shell => "shell",
            Self::Subagent => "subagent",
            Self::Lane => "lane",
            Self::Channel => "channel",
            Self::Comm => "comm",
            Self::Notification => "notification",
            Self::Embedding => "embedding",
            Self::Skill => "skill",
            Self::Advisor => "advisor",
            Self::Model => "model",
            Self::Mcp => "mcp",
            Self::Database => "database",
            Self::Storage => "storage",
            Self::Schedule => "schedule",
            Self::Voice => "voice",
            Self::Browser => "browser",
            Self::Oauth => "oauth",
            Self::User => "user",
        }
    }

    /// Whether this prefix accepts free-form identifier suffixes
    /// (hostnames, ports, provider names) rather than an enumerated set.
    #[must_use]
    pub fn accepts_any_suffix(self) -> bool {
        matches!(self, Self::Network | Self::Oauth)
    }

    /// The enumerated suffixes for this prefix.
    ///
    /// Empty for the free-form prefixes ([`accepts_any_suffix`](Self::accepts_any_suffix)).
    #[must_use]
    pub fn enumerated_suffixes(self) -> &'static [&'static str] {
        match self {
            Self::Network | Self::Oauth => &[],
            Self::Filesystem | Self::Settings | Self::Memory | Self::Database | Self::Storage => {
                &["read", "write"]
            },
            Self::Capability => &["provide", "consume"],
            Self::Session => &["read", "append"],
            Self::Context => &["read", "inject"],
            Self::Tool => &["invoke", "register", "web", "search", "exec"],
            Self::Shell => &["exec"],
            Self::Subagent => &["spawn"],
            Self::Lane => &["publish", "subscribe"],
            Self::Channel => &["send", "receive", "manage"],
            Self::Comm => &["send", "receive"],
            Self::Notification => &["send"],
            Self::Embedding => &["generate"],
            Self::Skill => &["invoke"],
            Self::Advisor => &["consult"],
            Self::Model => &["invoke", "list"],
            Self::Mcp => &["connect"],
            Self::Schedule => &["create", "manage"],
            Self::Voice => &["speak", "listen"],
            Self::Browser => &["navigate"],
            Self::User => &["token", "profile"],
        }
    }
}

impl fmt::Display for PermissionPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionPrefix {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| CoreError::InvalidPermission {
                value: s.to_string(),
                reason: "unknown prefix".into(),
            })
    }
}

/// A single declared permission: `prefix:suffix`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Permission {
    prefix: PermissionPrefix,
    suffix: String,
}

impl Permission {
    /// Parse and validate a `prefix:suffix` permission string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidPermission`] on an unknown prefix, a
    /// missing suffix, or a suffix outside the prefix's enumerated set.
    pub fn parse(s: &str) -> CoreResult<Self> {
        let (prefix_str, suffix) = s.split_once(':').ok_or_else(|| CoreError::InvalidPermission {
            value: s.to_string(),
            reason: "missing ':' separator".into(),
        })?;
        let prefix: PermissionPrefix = prefix_str.parse()?;
        if suffix.is_empty() {
            return Err(CoreError::InvalidPermission {
                value: s.to_string(),
                reason: "empty suffix".into(),
            });
        }

        if suffix != "*" {
            if prefix.accepts_any_suffix() {
                if !is_identifier_suffix(suffix) {
                    return Err(CoreError::InvalidPermission {
                        value: s.to_string(),
                        reason: "suffix contains invalid characters".into(),
                    });
                }
            } else if !prefix.enumerated_suffixes().contains(&suffix) {
                return Err(CoreError::InvalidPermission {
                    value: s.to_string(),
                    reason: format!(
                        "suffix '{suffix}' not in {:?}",
                        prefix.enumerated_suffixes()
                    ),
                });
            }
        }

        Ok(Self {
            prefix,
            suffix: suffix.to_string(),
        })
    }

    /// Build a permission from parts without re-validating the suffix.
    #[must_use]
    pub fn from_parts(prefix: PermissionPrefix, suffix: impl Into<String>) -> Self {
        Self {
            prefix,
            suffix: suffix.into(),
        }
    }

    /// The permission's prefix.
    #[must_use]
    pub fn prefix(&self) -> PermissionPrefix {
        self.prefix
    }

    /// The permission's suffix.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Whether this is the wildcard permission for its prefix.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.suffix == "*"
    }

    /// Whether this declared permission grants `needed`.
    ///
    /// A wildcard grants every suffix of the same prefix; otherwise the
    /// suffixes must match exactly.
    #[must_use]
    pub fn grants(&self, needed: &Permission) -> bool {
        self.prefix == needed.prefix && (self.is_wildcard() || self.suffix == needed.suffix)
    }
}

/// Identifier-style suffix check for the free-form prefixes: hostnames,
/// ports, provider names (`api.openai.com:443`, `github`).
fn is_identifier_suffix(suffix: &str) -> bool {
    suffix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '*'))
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.prefix, self.suffix)
    }
}

impl FromStr for Permission {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Permission {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// An ordered set of declared permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a list of permission strings into a set.
    ///
    /// # Errors
    ///
    /// Returns the first parse failure.
    pub fn parse_all<I, S>(items: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for item in items {
            set.insert(Permission::parse(item.as_ref())?);
        }
        Ok(Self(set))
    }

    /// Insert a permission.
    pub fn insert(&mut self, permission: Permission) {
        self.0.insert(permission);
    }

    /// Whether the set grants `needed` (exact match or wildcard).
    #[must_use]
    pub fn allows(&self, needed: &Permission) -> bool {
        self.0.iter().any(|p| p.grants(needed))
    }

    /// Whether any permission with the given prefix is declared.
    #[must_use]
    pub fn has_prefix(&self, prefix: PermissionPrefix) -> bool {
        self.0.iter().any(|p| p.prefix() == prefix)
    }

    /// Permissions present in `self` but not in `older` — the "added"
    /// half of an update diff.
    #[must_use]
    pub fn added_since(&self, older: &Self) -> Vec<Permission> {
        self.0.difference(&older.0).cloned().collect()
    }

    /// Iterate over the permissions in order.
    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }

    /// Number of declared permissions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enumerated() {
        let p = Permission::parse("filesystem:read").unwrap();
        assert_eq!(p.prefix(), PermissionPrefix::Filesystem);
        assert_eq!(p.suffix(), "read");
        assert!(Permission::parse("filesystem:execute").is_err());
    }

    #[test]
    fn test_parse_freeform() {
        assert!(Permission::parse("network:api.openai.com:443").is_ok());
        assert!(Permission::parse("oauth:github").is_ok());
        assert!(Permission::parse("network:has space").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_prefix() {
        assert!(Permission::parse("rocket:launch").is_err());
        assert!(Permission::parse("no-separator").is_err());
        assert!(Permission::parse("network:").is_err());
    }

    #[test]
    fn test_wildcard_grants() {
        let wild = Permission::parse("tool:*").unwrap();
        let web = Permission::parse("tool:web").unwrap();
        assert!(wild.grants(&web));
        assert!(!web.grants(&wild));

        let other_prefix = Permission::parse("shell:exec").unwrap();
        assert!(!wild.grants(&other_prefix));
    }

    #[test]
    fn test_set_allows() {
        let set = PermissionSet::parse_all(["network:*", "user:token"]).unwrap();
        assert!(set.allows(&Permission::parse("network:api.example.com").unwrap()));
        assert!(set.allows(&Permission::parse("user:token").unwrap()));
        assert!(!set.allows(&Permission::parse("shell:exec").unwrap()));
    }

    #[test]
    fn test_set_has_prefix() {
        let set = PermissionSet::parse_all(["network:api.example.com"]).unwrap();
        assert!(set.has_prefix(PermissionPrefix::Network));
        assert!(!set.has_prefix(PermissionPrefix::Comm));
    }

    #[test]
    fn test_added_since() {
        let v1 = PermissionSet::parse_all(["network:*"]).unwrap();
        let v2 = PermissionSet::parse_all(["network:*", "shell:exec"]).unwrap();

        let added = v2.added_since(&v1);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].to_string(), "shell:exec");

        assert!(v1.added_since(&v2).is_empty());
    }

    #[test]
    fn test_serde_round_trip() {
        let set = PermissionSet::parse_all(["network:*", "filesystem:read"]).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        let back: PermissionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
    }

    #[test]
    fn test_deserialize_rejects_invalid() {
        let bad: Result<PermissionSet, _> = serde_json::from_str("[\"rocket:launch\"]");
        assert!(bad.is_err());
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn arb_prefix() -> impl Strategy<Value = PermissionPrefix> {
            proptest::sample::select(PermissionPrefix::ALL.to_vec())
        }

        proptest! {
            #[test]
            fn wildcard_grants_every_enumerated_suffix(prefix in arb_prefix()) {
                let wild = Permission::from_parts(prefix, "*");
                for suffix in prefix.enumerated_suffixes() {
                    let needed = Permission::from_parts(prefix, *suffix);
                    prop_assert!(wild.grants(&needed));
                }
            }

            #[test]
            fn display_parse_round_trip(prefix in arb_prefix()) {
                for suffix in prefix.enumerated_suffixes() {
                    let p = Permission::from_parts(prefix, *suffix);
                    let back = Permission::parse(&p.to_string()).unwrap();
                    prop_assert_eq!(p, back);
                }
            }
        }
    }
}
