//! Vector-store namespaces.
//!
//! A namespace partitions vectors by tenant, knowledge space, and ingestion
//! version: `t_{tenant}_ks_{knowledge_space}_{version}`. Re-ingesting a
//! knowledge space under a new version writes to a fresh collection, so the
//! previous version's vectors are never blended with the new ones.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// Derive the namespace for a `(tenant, knowledge space, version)` triple.
    ///
    /// No validation is performed here; the inputs come from an already
    /// validated [`KnowledgeSpace`](crate::models::KnowledgeSpace).
    pub fn new(tenant_id: &str, knowledge_space_id: &str, version: &str) -> Self {
        Self(format!("t_{}_ks_{}_{}", tenant_id, knowledge_space_id, version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
