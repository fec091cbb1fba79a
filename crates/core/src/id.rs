//! Strongly-typed identifiers used across the engine.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Identity of a unit of work. Immutable once the event is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventId(String);

/// Name of the flow that owns a unit of work.
///
/// Must not contain `@`: it separates the flow from the cluster id in a store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FlowName(String);

/// Identifier of the cluster node (or cluster) a store key is scoped to.
///
/// Must not contain `@` or `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal, $reserved:expr) => {
        impl $t {
            /// Validate and wrap a raw identifier.
            pub fn parse(value: impl Into<String>) -> Result<Self, CoreError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(CoreError::invalid_id(format!("{}: empty", $name)));
                }
                let reserved: &[char] = $reserved;
                if let Some(c) = value.chars().find(|c| reserved.contains(c)) {
                    return Err(CoreError::invalid_id(format!(
                        "{}: '{}' contains reserved character '{}'",
                        $name, value, c
                    )));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $t {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

impl_string_newtype!(EventId, "EventId", &[]);
impl_string_newtype!(FlowName, "FlowName", &['@']);
impl_string_newtype!(ClusterId, "ClusterId", &['@', ':']);

impl EventId {
    /// Generate a fresh identity.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing ids explicitly in tests for
    /// determinism.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl ClusterId {
    /// Cluster id used when the node is not part of a cluster.
    pub fn local() -> Self {
        Self("local".to_string())
    }
}

impl Default for FlowName {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl Default for ClusterId {
    fn default() -> Self {
        Self::local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identifiers_are_rejected() {
        assert!(EventId::parse("").is_err());
        assert!(FlowName::parse("").is_err());
        assert!(ClusterId::parse("").is_err());
    }

    #[test]
    fn reserved_separators_are_rejected() {
        assert!(FlowName::parse("orders@eu").is_err());
        assert!(ClusterId::parse("node:1").is_err());
        assert!(ClusterId::parse("node@1").is_err());

        // Event ids are the last key segment and may contain anything.
        assert!(EventId::parse("a@b:c").is_ok());
    }

    #[test]
    fn generated_event_ids_are_unique() {
        assert_ne!(EventId::generate(), EventId::generate());
    }

    #[test]
    fn deserialization_validates() {
        let ok: FlowName = serde_json::from_str("\"orders\"").unwrap();
        assert_eq!(ok.as_str(), "orders");

        let bad: Result<FlowName, _> = serde_json::from_str("\"or@ders\"");
        assert!(bad.is_err());
    }
}
