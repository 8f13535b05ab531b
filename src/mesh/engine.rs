//! Mesh registry and gossip engine.
//!
//! Each cycle pushes this node's known-node view, service deltas and any
//! locally changed records to every valid sibling. Receivers apply what they
//! get through the stores' `*_by_mesh` entry points, which never feed the
//! local change queue, so nothing is re-broadcast.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::messages::{
    ChangedObject, Collection, NodeRef, SearchPage, SearchQuery, ServiceRef, SyncRequest,
};
use super::node::{GatewayNode, SiblingNode, SiblingView};
use super::queue::{ChangedBatch, ChangedObjectQueue};
use super::registry::ServiceRegistry;
use super::transport::MeshConnector;
use crate::credential::CredentialStore;
use crate::error::Result;
use crate::invalid_argument;
use crate::policy::{PolicyKind, PolicyTable};
use crate::settings::{Settings, SiblingConfig};
use crate::storage::{MemoryStore, Page};

pub const BOOTSTRAP_PAGE_SIZE: usize = 200;
pub const DEFAULT_SEARCH_LIMIT: usize = 100;
pub const MAX_SEARCH_LIMIT: usize = 1_000;

type SiblingMap = HashMap<String, Arc<SiblingNode>>;

/// Stores the engine replicates into
#[derive(Clone)]
pub struct MeshStores {
    pub credentials: CredentialStore,
    pub right_table: Arc<PolicyTable>,
    pub traffic_table: Arc<PolicyTable>,
}

impl MeshStores {
    /// Stores backed by process memory, sized from settings
    pub fn in_memory(settings: &Settings) -> Self {
        Self {
            credentials: CredentialStore::new(
                &settings.node_id,
                Arc::new(MemoryStore::new("master_key")),
                Arc::new(MemoryStore::new("service_access")),
                settings.access_cache_capacity,
                settings.negative_cache_ttl(),
            ),
            right_table: Arc::new(PolicyTable::new(
                PolicyKind::RightTable,
                Arc::new(MemoryStore::new("right_table")),
            )),
            traffic_table: Arc::new(PolicyTable::new(
                PolicyKind::TrafficTable,
                Arc::new(MemoryStore::new("traffic_table")),
            )),
        }
    }

    pub fn policy_table(&self, kind: PolicyKind) -> &Arc<PolicyTable> {
        match kind {
            PolicyKind::RightTable => &self.right_table,
            PolicyKind::TrafficTable => &self.traffic_table,
        }
    }
}

/// What happened to one gossip cycle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GossipOutcome {
    pub skipped: bool,
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

pub struct MeshEngine {
    node: GatewayNode,
    siblings: ArcSwap<SiblingMap>,
    sibling_writer: Mutex<()>,
    static_siblings: Vec<SiblingConfig>,
    registry: ServiceRegistry,
    changes: Option<Arc<ChangedObjectQueue>>,
    connector: Arc<dyn MeshConnector>,
    stores: MeshStores,
    interval: Option<Duration>,
    bootstrap_delay: Duration,
}

impl std::fmt::Debug for MeshEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshEngine")
            .field("node", &self.node)
            .field("siblings", &self.siblings.load().len())
            .field("collector", &self.changes.is_some())
            .field("interval", &self.interval)
            .finish()
    }
}

impl MeshEngine {
    /// Builds the engine from settings. On the master node this also creates
    /// the change queue and attaches it to every replicated store.
    pub fn new(settings: &Settings, stores: MeshStores, connector: Arc<dyn MeshConnector>) -> Self {
        let node = GatewayNode::new(&settings.node_id, settings.self_urls());
        let static_siblings: Vec<SiblingConfig> = settings
            .siblings
            .iter()
            .filter(|s| s.id != node.id)
            .cloned()
            .collect();
        let siblings: SiblingMap = static_siblings
            .iter()
            .map(|s| (s.id.clone(), Arc::new(SiblingNode::new(&s.id, s.urls.clone(), true))))
            .collect();

        let changes = if settings.is_master {
            let queue = Arc::new(ChangedObjectQueue::new());
            stores.credentials.attach_change_queue(queue.clone());
            stores.right_table.attach_change_queue(queue.clone());
            stores.traffic_table.attach_change_queue(queue.clone());
            Some(queue)
        } else {
            None
        };

        info!(
            "[{}] Mesh engine created with {} static siblings (collector: {})",
            node.id,
            siblings.len(),
            changes.is_some()
        );

        Self {
            registry: ServiceRegistry::new(&node.id),
            node,
            siblings: ArcSwap::from_pointee(siblings),
            sibling_writer: Mutex::new(()),
            static_siblings,
            changes,
            connector,
            stores,
            interval: settings.gossip_interval(),
            bootstrap_delay: Duration::from_secs(settings.bootstrap_delay_secs),
        }
    }

    pub fn node(&self) -> &GatewayNode {
        &self.node
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn stores(&self) -> &MeshStores {
        &self.stores
    }

    pub fn change_queue(&self) -> Option<&Arc<ChangedObjectQueue>> {
        self.changes.as_ref()
    }

    pub fn sibling(&self, id: &str) -> Option<Arc<SiblingNode>> {
        self.siblings.load().get(id).cloned()
    }

    pub fn siblings(&self) -> Vec<SiblingView> {
        let mut views: Vec<_> = self.siblings.load().values().map(|s| s.view()).collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Self plus every currently valid sibling
    pub fn known_nodes(&self) -> Vec<NodeRef> {
        let siblings = self.siblings.load();
        let mut valid: Vec<_> = siblings.values().filter(|s| s.is_valid()).collect();
        valid.sort_by(|a, b| a.id().cmp(b.id()));
        std::iter::once(self.node.node_ref())
            .chain(valid.into_iter().map(|s| s.node_ref()))
            .collect()
    }

    /// Gossip loop. Returns once `shutdown` flips, or immediately when no
    /// positive interval is configured.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Some(interval) = self.interval else {
            info!("[{}] Gossip disabled", self.node.id);
            return;
        };
        info!(
            "[{}] Starting gossip loop with {}s interval",
            self.node.id,
            interval.as_secs()
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let batch = tokio::select! {
                batch = self.wait_for_changes(interval) => batch,
                _ = shutdown.changed() => break,
            };
            self.gossip_with(batch).await;
        }
        info!("[{}] Gossip loop stopped", self.node.id);
    }

    async fn wait_for_changes(&self, interval: Duration) -> ChangedBatch {
        match &self.changes {
            Some(queue) => queue.poll(interval).await,
            None => {
                time::sleep(interval).await;
                ChangedBatch::default()
            }
        }
    }

    /// One cycle using whatever is queued right now
    pub async fn gossip_once(&self) -> GossipOutcome {
        let batch = self
            .changes
            .as_ref()
            .map(|q| q.drain())
            .unwrap_or_default();
        self.gossip_with(batch).await
    }

    pub async fn gossip_with(&self, batch: ChangedBatch) -> GossipOutcome {
        let deltas = self.registry.drain_deltas();
        let known = self.known_nodes();
        if known.len() < 2 {
            debug!("[{}] No valid siblings, skipping gossip cycle", self.node.id);
            return GossipOutcome {
                skipped: true,
                ..GossipOutcome::default()
            };
        }

        let request = SyncRequest {
            caller: Some(self.node.node_ref()),
            nodes: known,
            reg_services: deltas.registered,
            unreg_services: deltas.unregistered,
            updated_objects: batch.updates,
            deleted_objects: batch.deletes,
        };
        debug!(
            "[{}] Gossiping {} nodes, {} updates, {} deletes",
            self.node.id,
            request.nodes.len(),
            request.updated_objects.len(),
            request.deleted_objects.len()
        );

        let mut outcome = GossipOutcome::default();
        let siblings = self.siblings.load_full();
        let mut targets: Vec<_> = siblings.values().filter(|s| s.is_valid()).collect();
        targets.sort_by(|a, b| a.id().cmp(b.id()));
        for sibling in targets {
            let client = sibling.client(self.connector.as_ref());
            let failure = match client.sync(&request).await {
                Ok(resp) if resp.is_ok() => None,
                Ok(resp) => Some(format!("code {}: {}", resp.code, resp.msg)),
                Err(e) => Some(e.to_string()),
            };
            match failure {
                None => {
                    sibling.record_success();
                    outcome.delivered.push(sibling.id().to_string());
                }
                Some(reason) => {
                    let health = sibling.record_failure();
                    warn!(
                        "[{}] Sync to {} failed (health {}): {}",
                        self.node.id,
                        sibling.id(),
                        health,
                        reason
                    );
                    outcome.failed.push(sibling.id().to_string());
                }
            }
        }
        outcome
    }

    /// Handle a sync push from a sibling: refresh siblings, merge service
    /// deltas, then apply changed records.
    pub fn sync_from_brother(&self, request: SyncRequest) -> Result<()> {
        self.update_siblings(&request);
        self.registry
            .merge_remote(request.reg_services, request.unreg_services);

        for obj in request.updated_objects {
            let (kind, id) = (obj.type_name(), obj.id().to_string());
            if let Err(e) = self.apply_update(obj) {
                error!("[{}] Failed to apply {} {}: {}", self.node.id, kind, id, e);
            }
        }
        for obj in request.deleted_objects {
            let (kind, id) = (obj.type_name(), obj.id().to_string());
            if let Err(e) = self.apply_delete(obj) {
                error!("[{}] Failed to delete {} {}: {}", self.node.id, kind, id, e);
            }
        }
        Ok(())
    }

    fn update_siblings(&self, request: &SyncRequest) {
        let caller_id = request.caller_id().map(str::to_string);
        let _writer = self.sibling_writer.lock();
        let current = self.siblings.load_full();
        let mut replacement: Option<SiblingMap> = None;

        let mut seen = HashSet::new();
        for node in request.caller.iter().chain(request.nodes.iter()) {
            if node.id == self.node.id || !seen.insert(node.id.as_str()) {
                continue;
            }
            let is_caller = caller_id.as_deref() == Some(node.id.as_str());
            match current.get(&node.id) {
                Some(existing) => {
                    // only the caller is credited
                    let health = if is_caller {
                        existing.record_success()
                    } else {
                        existing.health()
                    };
                    if !existing.is_permanent() && existing.urls() != node.urls.as_slice() {
                        debug!("[{}] Sibling {} moved to {:?}", self.node.id, node.id, node.urls);
                        replacement
                            .get_or_insert_with(|| (*current).clone())
                            .insert(
                                node.id.clone(),
                                Arc::new(SiblingNode::with_health(
                                    &node.id,
                                    node.urls.clone(),
                                    false,
                                    health,
                                )),
                            );
                    }
                }
                None => {
                    info!("[{}] Learned sibling {} at {:?}", self.node.id, node.id, node.urls);
                    replacement
                        .get_or_insert_with(|| (*current).clone())
                        .insert(
                            node.id.clone(),
                            Arc::new(SiblingNode::new(&node.id, node.urls.clone(), false)),
                        );
                }
            }
        }

        if let Some(map) = replacement {
            self.siblings.store(Arc::new(map));
        }
    }

    fn apply_update(&self, obj: ChangedObject) -> Result<()> {
        match obj {
            ChangedObject::MasterKey(record) => {
                self.stores.credentials.update_master_key_by_mesh(record)
            }
            ChangedObject::ServiceAccess(record) => {
                self.stores.credentials.update_access_by_mesh(record)
            }
            ChangedObject::RightTable(record) => self.stores.right_table.update_by_mesh(record),
            ChangedObject::TrafficTable(record) => {
                self.stores.traffic_table.update_by_mesh(record)
            }
        }
    }

    fn apply_delete(&self, obj: ChangedObject) -> Result<()> {
        match obj {
            ChangedObject::RightTable(record) => {
                self.stores.right_table.delete_by_mesh(&record.id)?;
            }
            ChangedObject::TrafficTable(record) => {
                self.stores.traffic_table.delete_by_mesh(&record.id)?;
            }
            // credentials are invalidated, never removed
            other => warn!(
                "[{}] Ignoring replicated delete of {} {}",
                self.node.id,
                other.type_name(),
                other.id()
            ),
        }
        Ok(())
    }

    /// Serve one page of a collection to a bootstrapping sibling
    pub fn search(&self, collection: Collection, query: &SearchQuery) -> Result<SearchPage> {
        let limit = match query.limit {
            0 => DEFAULT_SEARCH_LIMIT,
            n => n.min(MAX_SEARCH_LIMIT),
        };
        let (begin, end, offset) = (query.begin, query.end, query.offset);
        let creds = &self.stores.credentials;
        Ok(match collection {
            Collection::MasterKey => {
                tag(creds.search_master_keys(begin, end, offset, limit)?, ChangedObject::MasterKey)
            }
            Collection::ServiceAccess => tag(
                creds.search_accesses(begin, end, offset, limit)?,
                ChangedObject::ServiceAccess,
            ),
            Collection::RightTable => tag(
                self.stores.right_table.search(begin, end, offset, limit)?,
                ChangedObject::RightTable,
            ),
            Collection::TrafficTable => tag(
                self.stores.traffic_table.search(begin, end, offset, limit)?,
                ChangedObject::TrafficTable,
            ),
        })
    }

    /// Wait out the startup delay, then import from a static sibling
    pub async fn run_bootstrap(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.static_siblings.is_empty() {
            return;
        }
        tokio::select! {
            _ = time::sleep(self.bootstrap_delay) => {}
            _ = shutdown.changed() => return,
        }
        self.bootstrap().await;
    }

    /// One-shot full import. Tries static siblings in order until one
    /// answers; returns the number of records applied.
    pub async fn bootstrap(&self) -> usize {
        for config in &self.static_siblings {
            match self.import_from(config).await {
                Ok(applied) => {
                    info!(
                        "[{}] Bootstrap imported {} records from {}",
                        self.node.id, applied, config.id
                    );
                    return applied;
                }
                Err(e) => warn!(
                    "[{}] Bootstrap from {} failed: {}",
                    self.node.id, config.id, e
                ),
            }
        }
        0
    }

    /// Errors only when the sibling never answered; later failures skip
    /// the rest of that collection.
    async fn import_from(&self, config: &SiblingConfig) -> Result<usize> {
        let client = match self.sibling(&config.id) {
            Some(sibling) => sibling.client(self.connector.as_ref()),
            None => self.connector.connect(&NodeRef {
                id: config.id.clone(),
                urls: config.urls.clone(),
            }),
        };

        let mut answered = false;
        let mut applied = 0;
        for collection in Collection::ALL {
            let mut offset = 0;
            loop {
                let query = SearchQuery::page(offset, BOOTSTRAP_PAGE_SIZE);
                let page = match client.search(collection, &query).await {
                    Ok(page) => page,
                    Err(e) if !answered => return Err(e),
                    Err(e) => {
                        warn!(
                            "[{}] Bootstrap {} from {} stopped at offset {}: {}",
                            self.node.id,
                            collection.rpc_name(),
                            config.id,
                            offset,
                            e
                        );
                        break;
                    }
                };
                answered = true;
                let fetched = page.items.len();
                for obj in page.items {
                    let id = obj.id().to_string();
                    match self.apply_update(obj) {
                        Ok(()) => applied += 1,
                        Err(e) => warn!("[{}] Bootstrap skip {}: {}", self.node.id, id, e),
                    }
                }
                offset += fetched;
                if fetched == 0 || offset >= page.total {
                    break;
                }
            }
        }
        Ok(applied)
    }

    pub fn register_service(&self, service: ServiceRef) -> Result<()> {
        if service.id.trim().is_empty() {
            return Err(invalid_argument!("service id must not be empty"));
        }
        self.registry.register(service);
        Ok(())
    }
}

fn tag<T>(page: Page<T>, wrap: impl Fn(T) -> ChangedObject) -> SearchPage {
    Page {
        items: page.items.into_iter().map(wrap).collect(),
        total: page.total,
    }
}
