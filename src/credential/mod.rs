//! Two-level credential hierarchy: per-group master keys and the access
//! credentials derived from them.
//!
//! An access key is never stored. It is recomputed from the credential id
//! and the master key it names, so replicating a master key is enough for a
//! sibling gateway to verify every credential of that group.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage_error;
use crate::storage::Record;

pub mod checksum;
pub mod derive;
pub mod id;
pub mod store;

pub use derive::{derive_access_key, generate_master_key, ACCESS_KEY_LEN, MASTER_KEY_LEN};
pub use id::{AccessId, IdGenerator};
pub use store::{AccessPages, CredentialStore};

/// Persisted master key row
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MasterKeyRecord {
    pub id: String,
    pub group_id: String,
    /// base64 of the 32 key bytes
    pub key: String,
    pub invalid: bool,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl Record for MasterKeyRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn update_time(&self) -> DateTime<Utc> {
        self.update_time
    }
}

/// Persisted access credential row; holds no secret
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessRecord {
    pub id: String,
    pub valid: bool,
    #[serde(default)]
    pub summary: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl Record for AccessRecord {
    fn id(&self) -> &str {
        &self.id
    }

    fn update_time(&self) -> DateTime<Utc> {
        self.update_time
    }
}

/// Live master key. The key bytes never change; only `invalid` does, in place.
#[derive(Debug)]
pub struct MasterKey {
    id: String,
    group_id: String,
    key: [u8; MASTER_KEY_LEN],
    invalid: AtomicBool,
    create_time: DateTime<Utc>,
}

impl MasterKey {
    pub fn from_record(record: &MasterKeyRecord) -> Result<Self> {
        let bytes = BASE64
            .decode(&record.key)
            .map_err(|e| storage_error!("master key {} is not base64: {}", record.id, e))?;
        let key: [u8; MASTER_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| storage_error!("master key {} has wrong length", record.id))?;
        Ok(Self {
            id: record.id.clone(),
            group_id: record.group_id.clone(),
            key,
            invalid: AtomicBool::new(record.invalid),
            create_time: record.create_time,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn key(&self) -> &[u8; MASTER_KEY_LEN] {
        &self.key
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub(crate) fn refresh(&self, record: &MasterKeyRecord) {
        self.invalid.store(record.invalid, Ordering::Release);
    }

    pub fn same_key(&self, record: &MasterKeyRecord) -> bool {
        BASE64
            .decode(&record.key)
            .map(|bytes| bytes.as_slice() == self.key.as_slice())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
struct AccessState {
    valid: bool,
    summary: String,
    update_time: DateTime<Utc>,
}

#[derive(Debug)]
struct AccessInner {
    id: String,
    master_key_id: String,
    create_time: DateTime<Utc>,
    state: RwLock<AccessState>,
}

/// Cached access credential handle.
///
/// Clones share state, so a reload observed by the store is visible to every
/// holder of the handle.
#[derive(Debug, Clone)]
pub struct Access {
    inner: Arc<AccessInner>,
}

impl Access {
    pub(crate) fn from_record(record: &AccessRecord, master_key_id: &str) -> Self {
        Self {
            inner: Arc::new(AccessInner {
                id: record.id.clone(),
                master_key_id: master_key_id.to_string(),
                create_time: record.create_time,
                state: RwLock::new(AccessState {
                    valid: record.valid,
                    summary: record.summary.clone(),
                    update_time: record.update_time,
                }),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn master_key_id(&self) -> &str {
        &self.inner.master_key_id
    }

    pub fn is_valid(&self) -> bool {
        self.inner.state.read().valid
    }

    pub fn summary(&self) -> String {
        self.inner.state.read().summary.clone()
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.inner.create_time
    }

    pub fn record(&self) -> AccessRecord {
        let state = self.inner.state.read();
        AccessRecord {
            id: self.inner.id.clone(),
            valid: state.valid,
            summary: state.summary.clone(),
            create_time: self.inner.create_time,
            update_time: state.update_time,
        }
    }

    pub fn same_handle(&self, other: &Access) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn refresh(&self, record: &AccessRecord) {
        let mut state = self.inner.state.write();
        state.valid = record.valid;
        state.summary = record.summary.clone();
        state.update_time = record.update_time;
    }
}

/// An access credential together with its derived key, as handed to callers
/// that just issued it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssuedAccess {
    pub id: String,
    /// base64 of the derived access key
    pub access_key: String,
    pub valid: bool,
    pub summary: String,
    pub create_time: DateTime<Utc>,
}

pub(crate) fn encode_key(key: &[u8]) -> String {
    BASE64.encode(key)
}
