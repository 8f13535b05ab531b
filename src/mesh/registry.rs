//! Service registry: services registered on this gateway, pending deltas for
//! the next gossip cycle, and services owned by siblings.
use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use super::messages::ServiceRef;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceDeltas {
    pub registered: Vec<ServiceRef>,
    pub unregistered: Vec<ServiceRef>,
}

impl ServiceDeltas {
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty() && self.unregistered.is_empty()
    }
}

#[derive(Default)]
struct Pending {
    registered: HashMap<String, ServiceRef>,
    unregistered: HashMap<String, ServiceRef>,
}

#[derive(Default)]
pub struct ServiceRegistry {
    node_id: String,
    local: Mutex<HashMap<String, ServiceRef>>,
    pending: Mutex<Pending>,
    remote: Mutex<HashMap<String, ServiceRef>>,
}

impl ServiceRegistry {
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            ..Self::default()
        }
    }

    /// Register a local service. Cancels a pending unregister of the same id.
    pub fn register(&self, mut service: ServiceRef) {
        service.node_id = self.node_id.clone();
        self.local
            .lock()
            .insert(service.id.clone(), service.clone());
        let mut pending = self.pending.lock();
        pending.unregistered.remove(&service.id);
        pending.registered.insert(service.id.clone(), service);
    }

    /// Returns false when the id was not registered here
    pub fn unregister(&self, id: &str) -> bool {
        let Some(service) = self.local.lock().remove(id) else {
            return false;
        };
        let mut pending = self.pending.lock();
        pending.registered.remove(id);
        pending.unregistered.insert(id.to_string(), service);
        true
    }

    /// Swap out everything pending since the last drain
    pub fn drain_deltas(&self) -> ServiceDeltas {
        let drained = std::mem::take(&mut *self.pending.lock());
        ServiceDeltas {
            registered: drained.registered.into_values().collect(),
            unregistered: drained.unregistered.into_values().collect(),
        }
    }

    /// Apply deltas received from a sibling. Entries claiming to be ours are
    /// ignored.
    pub fn merge_remote(&self, registered: Vec<ServiceRef>, unregistered: Vec<ServiceRef>) {
        let mut remote = self.remote.lock();
        for service in unregistered {
            if service.node_id != self.node_id {
                remote.remove(&service.id);
            }
        }
        for service in registered {
            if service.node_id == self.node_id {
                debug!("Ignoring echo of local service {}", service.id);
                continue;
            }
            remote.insert(service.id.clone(), service);
        }
    }

    pub fn local_services(&self) -> Vec<ServiceRef> {
        let mut services: Vec<_> = self.local.lock().values().cloned().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }

    pub fn remote_services(&self) -> Vec<ServiceRef> {
        let mut services: Vec<_> = self.remote.lock().values().cloned().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(id: &str) -> ServiceRef {
        ServiceRef {
            id: id.to_string(),
            name: format!("svc-{}", id),
            urls: vec![format!("http://{}:9000", id)],
            node_id: String::new(),
        }
    }

    #[test]
    fn test_register_then_unregister_cancels() {
        let registry = ServiceRegistry::new("gw-1");
        registry.register(service("a"));
        assert!(registry.unregister("a"));

        let deltas = registry.drain_deltas();
        assert!(deltas.registered.is_empty());
        assert_eq!(deltas.unregistered.len(), 1);
        assert_eq!(deltas.unregistered[0].node_id, "gw-1");

        registry.register(service("a"));
        let deltas = registry.drain_deltas();
        assert_eq!(deltas.registered.len(), 1);
        assert!(deltas.unregistered.is_empty());
        assert!(registry.drain_deltas().is_empty());
    }

    #[test]
    fn test_unregister_unknown() {
        let registry = ServiceRegistry::new("gw-1");
        assert!(!registry.unregister("nope"));
        assert!(registry.drain_deltas().is_empty());
    }

    #[test]
    fn test_merge_remote() {
        let registry = ServiceRegistry::new("gw-1");
        let mut theirs = service("b");
        theirs.node_id = "gw-2".to_string();
        let mut echo = service("c");
        echo.node_id = "gw-1".to_string();

        registry.merge_remote(vec![theirs.clone(), echo], vec![]);
        assert_eq!(registry.remote_services(), vec![theirs.clone()]);

        registry.merge_remote(vec![], vec![theirs]);
        assert!(registry.remote_services().is_empty());
        // remote merges never create local deltas
        assert!(registry.drain_deltas().is_empty());
    }
}
