//! Gateway nodes as seen by the mesh: this node, and its siblings with their
//! health counters.
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use super::messages::NodeRef;
use super::transport::{MeshClient, MeshConnector};

pub const INITIAL_HEALTH: i32 = 3;
pub const MAX_HEALTH: i32 = 10;
pub const MIN_HEALTH: i32 = -1;

/// This gateway. Immutable for the life of the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayNode {
    pub id: String,
    pub urls: Vec<String>,
}

impl GatewayNode {
    pub fn new(id: &str, urls: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            urls,
        }
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef {
            id: self.id.clone(),
            urls: self.urls.clone(),
        }
    }
}

/// Another gateway in the mesh.
///
/// Records are replaced wholesale when a sibling's identity or URLs change;
/// only the health counter mutates in place.
pub struct SiblingNode {
    id: String,
    urls: Vec<String>,
    permanent: bool,
    health: AtomicI32,
    client: OnceLock<Arc<dyn MeshClient>>,
}

impl std::fmt::Debug for SiblingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiblingNode")
            .field("id", &self.id)
            .field("urls", &self.urls)
            .field("permanent", &self.permanent)
            .field("health", &self.health())
            .finish()
    }
}

impl SiblingNode {
    pub fn new(id: &str, urls: Vec<String>, permanent: bool) -> Self {
        Self::with_health(id, urls, permanent, INITIAL_HEALTH)
    }

    pub(crate) fn with_health(id: &str, urls: Vec<String>, permanent: bool, health: i32) -> Self {
        Self {
            id: id.to_string(),
            urls,
            permanent,
            health: AtomicI32::new(health.clamp(MIN_HEALTH, MAX_HEALTH)),
            client: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Statically configured siblings never drop out of the gossip set
    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    pub fn health(&self) -> i32 {
        self.health.load(Ordering::Acquire)
    }

    pub fn is_valid(&self) -> bool {
        self.permanent || self.health() >= 0
    }

    /// Returns the new health
    pub fn record_success(&self) -> i32 {
        self.adjust(1)
    }

    /// Returns the new health
    pub fn record_failure(&self) -> i32 {
        self.adjust(-1)
    }

    fn adjust(&self, delta: i32) -> i32 {
        let mut current = self.health.load(Ordering::Acquire);
        loop {
            let next = (current + delta).clamp(MIN_HEALTH, MAX_HEALTH);
            match self.health.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef {
            id: self.id.clone(),
            urls: self.urls.clone(),
        }
    }

    /// Client for this sibling, created on first use and dropped with the record
    pub fn client(&self, connector: &dyn MeshConnector) -> Arc<dyn MeshClient> {
        self.client
            .get_or_init(|| connector.connect(&self.node_ref()))
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn has_client(&self) -> bool {
        self.client.get().is_some()
    }

    pub fn view(&self) -> SiblingView {
        SiblingView {
            id: self.id.clone(),
            urls: self.urls.clone(),
            permanent: self.permanent,
            health: self.health(),
            valid: self.is_valid(),
        }
    }
}

/// Operator-facing snapshot of a sibling
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiblingView {
    pub id: String,
    pub urls: Vec<String>,
    pub permanent: bool,
    pub health: i32,
    pub valid: bool,
}
