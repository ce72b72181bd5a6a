//! Cache generation naming.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Opaque deployment token. Only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationId(String);

impl GenerationId {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::validation("generation id must not be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of one cache namespace, `{logical-name}-{generation}` for the ones we create.
///
/// Names listed from a store may belong to older deployments or to other
/// logical caches, so any string is accepted here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceName(String);

impl NamespaceName {
    pub fn for_generation(logical_name: &str, generation: &GenerationId) -> Self {
        Self(format!("{logical_name}-{generation}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for NamespaceName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for NamespaceName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for NamespaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
