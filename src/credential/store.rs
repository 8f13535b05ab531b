//! Credential store: issues, verifies and caches access credentials and owns
//! the master keys they are derived from.
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::checksum::checksum;
use super::derive::{derive_access_key, generate_master_key, ACCESS_KEY_LEN};
use super::id::{AccessId, IdGenerator, ACCESS_KIND};
use super::{encode_key, Access, AccessRecord, IssuedAccess, MasterKey, MasterKeyRecord};
use crate::error::{GatewayError, Result};
use crate::{illegal_state, invalid_argument};
use crate::lifecycle::CacheTrim;
use crate::mesh::messages::ChangedObject;
use crate::mesh::queue::ChangedObjectQueue;
use crate::storage::{Page, RecordStore, ReloadListener};

const LOAD_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone)]
enum CacheEntry {
    Present(Access),
    Missing(Instant),
}

struct StoreInner {
    master_keys: Arc<dyn RecordStore<MasterKeyRecord>>,
    accesses: Arc<dyn RecordStore<AccessRecord>>,
    id_gen: IdGenerator,

    // complete once loaded; kept complete by reload notifications
    keys: RwLock<HashMap<String, Arc<MasterKey>>>,
    keys_loaded: Mutex<bool>,
    group_locks: Gates,

    cache: Mutex<LruCache<String, CacheEntry>>,
    loading: Gates,
    negative_ttl: Duration,
    // bumped on every reload; a lookup that raced a reload is not cached
    reload_generation: AtomicU64,

    changes: RwLock<Option<Arc<ChangedObjectQueue>>>,
}

/// Cheap to clone; all clones share caches and backing stores.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("master_keys", &self.inner.keys.read().len())
            .field("cached_accesses", &self.inner.cache.lock().len())
            .finish()
    }
}

/// Refreshes cached handles when the backing store reports a write
struct CacheRefresher {
    inner: Weak<StoreInner>,
}

impl ReloadListener<MasterKeyRecord> for CacheRefresher {
    fn on_reload(&self, record: &MasterKeyRecord) {
        if let Some(inner) = self.inner.upgrade() {
            inner.refresh_master_key(record);
        }
    }
}

impl ReloadListener<AccessRecord> for CacheRefresher {
    fn on_reload(&self, record: &AccessRecord) {
        if let Some(inner) = self.inner.upgrade() {
            inner.refresh_access(record);
        }
    }

    fn on_delete(&self, id: &str) {
        if let Some(inner) = self.inner.upgrade() {
            inner.cache.lock().pop(id);
        }
    }
}

impl StoreInner {
    fn refresh_master_key(&self, record: &MasterKeyRecord) {
        self.reload_generation.fetch_add(1, Ordering::AcqRel);
        {
            let keys = self.keys.read();
            if let Some(existing) = keys.get(&record.id) {
                if existing.same_key(record) {
                    existing.refresh(record);
                } else {
                    error!(
                        "Master key {} reloaded with different key bytes, keeping the original",
                        record.id
                    );
                }
                return;
            }
        }
        match MasterKey::from_record(record) {
            Ok(key) => {
                self.keys
                    .write()
                    .entry(record.id.clone())
                    .or_insert_with(|| Arc::new(key));
                // ids under this key may have been cached as missing before it arrived
                self.purge_negative();
            }
            Err(e) => error!("Ignoring unreadable master key {}: {}", record.id, e),
        }
    }

    fn refresh_access(&self, record: &AccessRecord) {
        self.reload_generation.fetch_add(1, Ordering::AcqRel);
        let mut cache = self.cache.lock();
        let drop_entry = match cache.peek(&record.id) {
            Some(CacheEntry::Present(access)) => {
                access.refresh(record);
                false
            }
            Some(CacheEntry::Missing(_)) => true,
            None => false,
        };
        if drop_entry {
            cache.pop(&record.id);
        }
    }

    fn purge_negative(&self) {
        let mut cache = self.cache.lock();
        let missing: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| matches!(entry, CacheEntry::Missing(_)))
            .map(|(id, _)| id.clone())
            .collect();
        for id in missing {
            cache.pop(&id);
        }
    }

    fn enqueue(&self, obj: ChangedObject) {
        if let Some(queue) = self.changes.read().as_ref() {
            queue.put_updated(obj);
        }
    }
}

impl CredentialStore {
    pub fn new(
        node_id: &str,
        master_keys: Arc<dyn RecordStore<MasterKeyRecord>>,
        accesses: Arc<dyn RecordStore<AccessRecord>>,
        cache_capacity: usize,
        negative_ttl: Duration,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let inner = Arc::new(StoreInner {
            master_keys: master_keys.clone(),
            accesses: accesses.clone(),
            id_gen: IdGenerator::new(node_id),
            keys: RwLock::new(HashMap::new()),
            keys_loaded: Mutex::new(false),
            group_locks: Mutex::new(HashMap::new()),
            cache: Mutex::new(LruCache::new(capacity)),
            loading: Mutex::new(HashMap::new()),
            negative_ttl,
            reload_generation: AtomicU64::new(0),
            changes: RwLock::new(None),
        });
        let refresher = Arc::new(CacheRefresher {
            inner: Arc::downgrade(&inner),
        });
        master_keys.subscribe(refresher.clone());
        accesses.subscribe(refresher);
        Self { inner }
    }

    /// Route local mutations into the replication queue
    pub fn attach_change_queue(&self, queue: Arc<ChangedObjectQueue>) {
        *self.inner.changes.write() = Some(queue);
    }

    /// Full-table load on first use; later arrivals come through reload notifications
    fn ensure_keys_loaded(&self) -> Result<()> {
        let mut loaded = self.inner.keys_loaded.lock();
        if *loaded {
            return Ok(());
        }
        let mut offset = 0;
        loop {
            let page = self
                .inner
                .master_keys
                .starts_with("", offset, LOAD_PAGE_SIZE)?;
            let fetched = page.items.len();
            for record in page.items {
                self.inner.refresh_master_key(&record);
            }
            offset += fetched;
            if fetched == 0 || offset >= page.total {
                break;
            }
        }
        info!("Loaded {} master keys", self.inner.keys.read().len());
        *loaded = true;
        Ok(())
    }

    fn group_lock(&self, group_id: &str) -> Arc<Mutex<()>> {
        self.inner
            .group_locks
            .lock()
            .entry(group_id.to_string())
            .or_default()
            .clone()
    }

    /// Oldest valid key of the group, ties broken by id
    fn find_valid_key(&self, group_id: &str) -> Option<Arc<MasterKey>> {
        self.inner
            .keys
            .read()
            .values()
            .filter(|k| k.group_id() == group_id && !k.is_invalid())
            .min_by(|a, b| {
                a.create_time()
                    .cmp(&b.create_time())
                    .then_with(|| a.id().cmp(b.id()))
            })
            .cloned()
    }

    /// The valid master key of `group_id`, created on first request.
    ///
    /// Concurrent callers for the same group observe exactly one creation.
    pub fn open_master_key(&self, group_id: &str) -> Result<Arc<MasterKey>> {
        if group_id.trim().is_empty() {
            return Err(invalid_argument!("groupId must not be empty"));
        }
        self.ensure_keys_loaded()?;
        if let Some(key) = self.find_valid_key(group_id) {
            return Ok(key);
        }

        let lock = self.group_lock(group_id);
        let opened = {
            let _guard = lock.lock();
            match self.find_valid_key(group_id) {
                Some(key) => Ok(key),
                None => self.create_master_key(group_id),
            }
        };
        release_gate(&self.inner.group_locks, group_id, lock);
        opened
    }

    // caller holds the group lock
    fn create_master_key(&self, group_id: &str) -> Result<Arc<MasterKey>> {
        let now = Utc::now();
        let record = MasterKeyRecord {
            id: self.inner.id_gen.next_master_key_id(),
            group_id: group_id.to_string(),
            key: encode_key(&generate_master_key()),
            invalid: false,
            create_time: now,
            update_time: now,
        };
        self.inner.master_keys.insert(record.clone()).map_err(|e| {
            error!("Master key id collision for group {}: {}", group_id, e);
            e
        })?;
        // the reload notification normally inserts it already
        self.inner.refresh_master_key(&record);
        let key = self
            .inner
            .keys
            .read()
            .get(&record.id)
            .cloned()
            .ok_or_else(|| illegal_state!("master key {} vanished", record.id))?;
        info!("Created master key {} for group {}", record.id, group_id);
        self.inner.enqueue(ChangedObject::MasterKey(record));
        Ok(key)
    }

    pub fn get_master_key(&self, id: &str) -> Result<Option<Arc<MasterKey>>> {
        self.ensure_keys_loaded()?;
        if let Some(key) = self.inner.keys.read().get(id) {
            return Ok(Some(key.clone()));
        }
        match self.inner.master_keys.get(id)? {
            Some(record) => {
                self.inner.refresh_master_key(&record);
                Ok(self.inner.keys.read().get(id).cloned())
            }
            None => Ok(None),
        }
    }

    pub fn invalidate_master_key(&self, id: &str) -> Result<()> {
        let mut record = self
            .inner
            .master_keys
            .get(id)?
            .ok_or_else(|| GatewayError::NotFound(format!("master key {}", id)))?;
        record.invalid = true;
        record.update_time = Utc::now();
        self.inner.master_keys.put(record.clone())?;
        warn!("Master key {} of group {} invalidated", id, record.group_id);
        self.inner.enqueue(ChangedObject::MasterKey(record));
        Ok(())
    }

    /// Issue a fresh credential for `group_id`
    pub fn create_access(&self, group_id: &str) -> Result<Access> {
        let master = self.open_master_key(group_id)?;
        let ordinal = self.inner.id_gen.next_id().to_string();
        let id = AccessId::new(master.id(), checksum(&ordinal, master.key()), &ordinal).to_string();

        let now = Utc::now();
        let record = AccessRecord {
            id: id.clone(),
            valid: true,
            summary: String::new(),
            create_time: now,
            update_time: now,
        };
        if let Err(e) = self.inner.accesses.insert(record.clone()) {
            error!("Access id generator produced a duplicate {}: {}", id, e);
            return Err(e);
        }
        debug!("Created access {} under master key {}", id, master.id());
        self.inner.enqueue(ChangedObject::ServiceAccess(record));

        self.get_access(&id)?.ok_or_else(|| {
            GatewayError::IllegalState(format!("access {} not readable after create", id))
        })
    }

    /// Issue a credential and return it with its derived key
    pub fn issue_access(&self, group_id: &str) -> Result<IssuedAccess> {
        let access = self.create_access(group_id)?;
        let key = self.access_key(&access)?;
        Ok(IssuedAccess {
            id: access.id().to_string(),
            access_key: encode_key(&key),
            valid: access.is_valid(),
            summary: access.summary(),
            create_time: access.create_time(),
        })
    }

    /// Master key named by `id`, when the id is well formed and its checksum
    /// matches that key
    pub fn verified_master_key(&self, id: &str) -> Result<Option<Arc<MasterKey>>> {
        let Some(parsed) = AccessId::parse(id) else {
            return Ok(None);
        };
        if parsed.kind != ACCESS_KIND {
            return Ok(None);
        }
        let Some(master) = self.get_master_key(&parsed.master_key_id)? else {
            return Ok(None);
        };
        if checksum(&parsed.ordinal, master.key()) != parsed.checksum {
            return Ok(None);
        }
        Ok(Some(master))
    }

    pub fn verify_access_id(&self, id: &str) -> bool {
        matches!(self.verified_master_key(id), Ok(Some(_)))
    }

    /// `Some(Some(access))` hit, `Some(None)` fresh negative entry, `None` miss
    fn cache_lookup(&self, id: &str) -> Option<Option<Access>> {
        let mut cache = self.inner.cache.lock();
        let fresh = match cache.get(id) {
            Some(CacheEntry::Present(access)) => return Some(Some(access.clone())),
            Some(CacheEntry::Missing(at)) => at.elapsed() < self.inner.negative_ttl,
            None => return None,
        };
        if fresh {
            Some(None)
        } else {
            cache.pop(id);
            None
        }
    }

    fn load_access(&self, id: &str) -> Result<Option<Access>> {
        let Some(master) = self.verified_master_key(id)? else {
            debug!("Rejected access id {}", id);
            return Ok(None);
        };
        Ok(self
            .inner
            .accesses
            .get(id)?
            .map(|record| Access::from_record(&record, master.id())))
    }

    /// Cached lookup with one loader in flight per id. Unknown or forged ids
    /// are cached as missing for a short while.
    pub fn get_access(&self, id: &str) -> Result<Option<Access>> {
        if let Some(hit) = self.cache_lookup(id) {
            return Ok(hit);
        }

        let gate = self
            .inner
            .loading
            .lock()
            .entry(id.to_string())
            .or_default()
            .clone();
        let result = {
            let _guard = gate.lock();
            match self.cache_lookup(id) {
                Some(hit) => Ok(hit),
                None => {
                    let generation = self.inner.reload_generation.load(Ordering::Acquire);
                    self.load_access(id).map(|loaded| {
                        let entry = match &loaded {
                            Some(access) => CacheEntry::Present(access.clone()),
                            None => CacheEntry::Missing(Instant::now()),
                        };
                        let mut cache = self.inner.cache.lock();
                        if self.inner.reload_generation.load(Ordering::Acquire) == generation {
                            cache.put(id.to_string(), entry);
                        }
                        loaded
                    })
                }
            }
        };
        release_gate(&self.inner.loading, id, gate);
        result
    }

    /// Derived key of `access`. Works whether or not the master key is invalid.
    pub fn access_key(&self, access: &Access) -> Result<[u8; ACCESS_KEY_LEN]> {
        self.access_key_for(access.id(), access.master_key_id())
    }

    fn access_key_for(&self, id: &str, master_key_id: &str) -> Result<[u8; ACCESS_KEY_LEN]> {
        let master = self.get_master_key(master_key_id)?.ok_or_else(|| {
            GatewayError::IllegalState(format!(
                "no master key {} to derive access {}",
                master_key_id, id
            ))
        })?;
        derive_access_key(id, master.key())
    }

    pub fn set_access_state(&self, id: &str, valid: bool) -> Result<Access> {
        self.update_access_record(id, |record| record.valid = valid)
    }

    pub fn set_access_summary(&self, id: &str, summary: &str) -> Result<Access> {
        self.update_access_record(id, |record| record.summary = summary.to_string())
    }

    fn update_access_record<F>(&self, id: &str, change: F) -> Result<Access>
    where
        F: FnOnce(&mut AccessRecord),
    {
        let access = self
            .get_access(id)?
            .ok_or_else(|| GatewayError::NotFound(format!("access {}", id)))?;
        let mut record = access.record();
        change(&mut record);
        record.update_time = Utc::now();
        // the reload notification refreshes the cached handle, which may
        // not be this one if it was evicted meanwhile
        self.inner.accesses.put(record.clone())?;
        access.refresh(&record);
        self.inner.enqueue(ChangedObject::ServiceAccess(record));
        Ok(access)
    }

    /// Apply a master key replicated from a sibling. Never re-enqueued.
    pub fn update_master_key_by_mesh(&self, record: MasterKeyRecord) -> Result<()> {
        if let Some(existing) = self.inner.keys.read().get(&record.id) {
            if !existing.same_key(&record) {
                return Err(GatewayError::IllegalState(format!(
                    "replicated master key {} conflicts with local key bytes",
                    record.id
                )));
            }
        }
        self.inner.master_keys.put(record)
    }

    /// Apply an access record replicated from a sibling. Never re-enqueued.
    pub fn update_access_by_mesh(&self, record: AccessRecord) -> Result<()> {
        self.inner.accesses.put(record)
    }

    /// Lazy page sequence over credentials, optionally limited to one group
    /// and filtered by a substring of the summary
    pub fn list_access(
        &self,
        group_id: Option<&str>,
        keyword: Option<&str>,
        page_size: usize,
    ) -> Result<AccessPages> {
        let prefixes = match group_id {
            Some(group) => {
                self.ensure_keys_loaded()?;
                let mut ids: Vec<String> = self
                    .inner
                    .keys
                    .read()
                    .values()
                    .filter(|k| k.group_id() == group)
                    .map(|k| k.id().to_string())
                    .collect();
                ids.sort();
                ids.into_iter()
                    .map(|mk| AccessId::prefix(Some(&mk)))
                    .collect()
            }
            None => vec![AccessId::prefix(None)],
        };
        Ok(AccessPages {
            store: self.clone(),
            prefixes,
            keyword: keyword.filter(|k| !k.is_empty()).map(str::to_string),
            page_size: page_size.max(1),
            prefix_index: 0,
            offset: 0,
        })
    }

    /// Reuse the cached handle when there is one so callers share state
    fn handle_for(&self, record: &AccessRecord) -> Access {
        if let Some(Some(access)) = self.cache_lookup(&record.id) {
            return access;
        }
        let master_key_id = AccessId::parse(&record.id)
            .map(|p| p.master_key_id)
            .unwrap_or_default();
        Access::from_record(record, &master_key_id)
    }

    pub fn search_master_keys(
        &self,
        begin: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        offset: usize,
        limit: usize,
    ) -> Result<Page<MasterKeyRecord>> {
        self.inner.master_keys.search(begin, end, offset, limit)
    }

    pub fn search_accesses(
        &self,
        begin: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        offset: usize,
        limit: usize,
    ) -> Result<Page<AccessRecord>> {
        self.inner.accesses.search(begin, end, offset, limit)
    }

    pub fn cached_accesses(&self) -> usize {
        self.inner.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.lock().clear();
    }
}

impl CacheTrim for CredentialStore {
    fn name(&self) -> &str {
        "access-credentials"
    }

    // master keys stay: the map must remain complete
    fn trim(&self) {
        self.clear_cache();
    }
}

/// Restartable, pull-based pages of access credentials
pub struct AccessPages {
    store: CredentialStore,
    prefixes: Vec<String>,
    keyword: Option<String>,
    page_size: usize,
    prefix_index: usize,
    offset: usize,
}

impl AccessPages {
    pub fn restart(&mut self) {
        self.prefix_index = 0;
        self.offset = 0;
    }

    /// Next non-exhausted page; `Ok(None)` once every prefix is drained.
    /// Pages may come back shorter than `page_size` after keyword filtering.
    pub fn next_page(&mut self) -> Result<Option<Vec<Access>>> {
        while let Some(prefix) = self.prefixes.get(self.prefix_index) {
            let page = self
                .store
                .inner
                .accesses
                .starts_with(prefix, self.offset, self.page_size)?;
            if page.items.is_empty() {
                self.prefix_index += 1;
                self.offset = 0;
                continue;
            }
            self.offset += page.items.len();
            if self.offset >= page.total {
                self.prefix_index += 1;
                self.offset = 0;
            }
            let items = page
                .items
                .iter()
                .filter(|r| {
                    self.keyword
                        .as_deref()
                        .map_or(true, |k| r.summary.contains(k))
                })
                .map(|r| self.store.handle_for(r))
                .collect();
            return Ok(Some(items));
        }
        Ok(None)
    }

    /// Drain the remaining pages into one list
    pub fn collect_all(&mut self) -> Result<Vec<Access>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page()? {
            all.extend(page);
        }
        Ok(all)
    }
}

impl Iterator for AccessPages {
    type Item = Result<Vec<Access>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_page().transpose()
    }
}

type Gates = Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Drops `gate` and forgets its map entry once no one else holds it
fn release_gate(gates: &Gates, key: &str, gate: Arc<Mutex<()>>) {
    let mut gates = gates.lock();
    let ours = gates.get(key).is_some_and(|g| Arc::ptr_eq(g, &gate));
    drop(gate);
    if ours && gates.get(key).is_some_and(|g| Arc::strong_count(g) == 1) {
        gates.remove(key);
    }
}
