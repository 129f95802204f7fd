//! Physical key layout: how logical record keys land in the engine.
//!
//! Flat: one physical string key per record, `namespace ":" key`, with
//! expiry attached to every write. Container: one hash per namespace
//! holding each record as a field; the engine cannot expire single hash
//! fields, so freshness is enforced at the record envelope and the
//! container itself carries a coarse outer TTL.

use serde::{Deserialize, Serialize};

/// Deployment-time choice of physical layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    Flat,
    Container,
}

impl Default for Scheme {
    fn default() -> Self {
        Scheme::Flat
    }
}

/// Maps logical record keys to physical storage under one namespace.
#[derive(Debug, Clone)]
pub struct Keyspace {
    namespace: String,
    scheme: Scheme,
}

impl Keyspace {
    pub fn new(namespace: String, scheme: Scheme) -> Self {
        Self { namespace, scheme }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Physical key for one record under the flat scheme.
    pub fn physical(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Prefix owned by this namespace under the flat scheme.
    pub fn prefix(&self) -> String {
        format!("{}:", self.namespace)
    }

    /// Container name under the container scheme.
    pub fn container(&self) -> &str {
        &self.namespace
    }
}
