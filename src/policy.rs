//! Replicated policy tables (right table, traffic table).
//!
//! The gateway only stores and replicates these rows; matching requests
//! against them happens elsewhere.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::mesh::messages::ChangedObject;
use crate::mesh::queue::ChangedObjectQueue;
use crate::storage::{Page, Record, RecordStore};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PolicyRecord {
    pub id: String,
    pub content: serde_json::Value,
    pub update_time: DateTime<Utc>,
}

impl PolicyRecord {
    pub fn new(id: &str, content: serde_json::Value) -> Self {
        Self {
            id: id.to_string(),
            content,
            update_time: Utc::now(),
        }
    }
}

impl Record for PolicyRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn update_time(&self) -> DateTime<Utc> {
        self.update_time
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    RightTable,
    TrafficTable,
}

impl PolicyKind {
    pub fn wrap(self, record: PolicyRecord) -> ChangedObject {
        match self {
            PolicyKind::RightTable => ChangedObject::RightTable(record),
            PolicyKind::TrafficTable => ChangedObject::TrafficTable(record),
        }
    }
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyKind::RightTable => write!(f, "right_table"),
            PolicyKind::TrafficTable => write!(f, "traffic_table"),
        }
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "right" | "right_table" => Ok(PolicyKind::RightTable),
            "traffic" | "traffic_table" => Ok(PolicyKind::TrafficTable),
            _ => Err(format!("Unknown policy table: {}", s)),
        }
    }
}

pub struct PolicyTable {
    kind: PolicyKind,
    store: Arc<dyn RecordStore<PolicyRecord>>,
    changes: RwLock<Option<Arc<ChangedObjectQueue>>>,
}

impl PolicyTable {
    pub fn new(kind: PolicyKind, store: Arc<dyn RecordStore<PolicyRecord>>) -> Self {
        Self {
            kind,
            store,
            changes: RwLock::new(None),
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    /// Route local mutations into the replication queue
    pub fn attach_change_queue(&self, queue: Arc<ChangedObjectQueue>) {
        *self.changes.write() = Some(queue);
    }

    pub fn get(&self, id: &str) -> Result<Option<PolicyRecord>> {
        self.store.get(id)
    }

    /// Local write; replicated when this node collects changes
    pub fn put(&self, record: PolicyRecord) -> Result<()> {
        self.store.put(record.clone())?;
        if let Some(queue) = self.changes.read().as_ref() {
            queue.put_updated(self.kind.wrap(record));
        }
        Ok(())
    }

    /// Local delete; replicated when this node collects changes
    pub fn delete(&self, id: &str) -> Result<bool> {
        let existing = self.store.get(id)?;
        let removed = self.store.delete(id)?;
        if let (true, Some(record), Some(queue)) = (removed, existing, self.changes.read().as_ref())
        {
            queue.put_deleted(self.kind.wrap(record));
        }
        Ok(removed)
    }

    /// Apply a row replicated from a sibling. Never re-enqueued.
    pub fn update_by_mesh(&self, record: PolicyRecord) -> Result<()> {
        debug!("{} update by mesh: {}", self.kind, record.id);
        self.store.put(record)
    }

    pub fn delete_by_mesh(&self, id: &str) -> Result<bool> {
        debug!("{} delete by mesh: {}", self.kind, id);
        self.store.delete(id)
    }

    pub fn search(
        &self,
        begin: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        offset: usize,
        limit: usize,
    ) -> Result<Page<PolicyRecord>> {
        self.store.search(begin, end, offset, limit)
    }
}
