//! Persistence collaborator for policy tables.
//!
//! The gateway core only needs keyed upserts, prefix scans, time-range scans
//! and change notification; anything that provides those can back the
//! credential store and the policy tables.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod memory;

pub use memory::MemoryStore;

/// A persisted row
pub trait Record: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
    fn update_time(&self) -> DateTime<Utc>;
}

/// One page of a listing
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

/// Notified whenever a record is written, whatever the origin of the write
pub trait ReloadListener<T: Record>: Send + Sync {
    fn on_reload(&self, record: &T);

    fn on_delete(&self, _id: &str) {}
}

pub trait RecordStore<T: Record>: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<T>>;

    /// Upsert; notifies every listener
    fn put(&self, record: T) -> Result<()>;

    /// Insert only; fails with `AlreadyExists` when the id is taken
    fn insert(&self, record: T) -> Result<()>;

    /// Returns whether a record was removed
    fn delete(&self, id: &str) -> Result<bool>;

    /// Id-ordered page of records whose id starts with `prefix`
    fn starts_with(&self, prefix: &str, offset: usize, limit: usize) -> Result<Page<T>>;

    /// Page of records with `begin <= update_time < end`, oldest first
    fn search(
        &self,
        begin: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        offset: usize,
        limit: usize,
    ) -> Result<Page<T>>;

    fn subscribe(&self, listener: Arc<dyn ReloadListener<T>>);
}
