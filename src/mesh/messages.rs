//! Mesh Message Protocol
//!
//! Wire types for the pairwise `sync` push and the paged bootstrap listings.
//! Everything travels as JSON over HTTP.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credential::{AccessRecord, MasterKeyRecord};
use crate::policy::PolicyRecord;
use crate::storage::Page;

pub const SYNC_OK: i32 = 0;

/// A gateway node as advertised over the mesh
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeRef {
    pub id: String,
    pub urls: Vec<String>,
}

/// A service instance registered on some gateway
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub urls: Vec<String>,
    /// Gateway that owns the registration
    #[serde(default)]
    pub node_id: String,
}

/// A replicated record, tagged so the receiver can route it to its store
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "record", rename_all = "snake_case")]
pub enum ChangedObject {
    MasterKey(MasterKeyRecord),
    ServiceAccess(AccessRecord),
    RightTable(PolicyRecord),
    TrafficTable(PolicyRecord),
}

impl ChangedObject {
    pub fn id(&self) -> &str {
        match self {
            ChangedObject::MasterKey(r) => &r.id,
            ChangedObject::ServiceAccess(r) => &r.id,
            ChangedObject::RightTable(r) => &r.id,
            ChangedObject::TrafficTable(r) => &r.id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ChangedObject::MasterKey(_) => "master_key",
            ChangedObject::ServiceAccess(_) => "service_access",
            ChangedObject::RightTable(_) => "right_table",
            ChangedObject::TrafficTable(_) => "traffic_table",
        }
    }
}

/// Push from one gateway to a sibling.
///
/// `caller` is the sending node; only its health is credited on receipt.
/// `nodes` is everything the caller currently considers alive, itself included.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncRequest {
    pub caller: Option<NodeRef>,
    pub nodes: Vec<NodeRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reg_services: Vec<ServiceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreg_services: Vec<ServiceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated_objects: Vec<ChangedObject>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_objects: Vec<ChangedObject>,
}

impl SyncRequest {
    /// The caller, falling back to the head of the node list for peers that
    /// do not send an explicit caller
    pub fn caller_id(&self) -> Option<&str> {
        self.caller
            .as_ref()
            .or_else(|| self.nodes.first())
            .map(|n| n.id.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResponse {
    pub code: i32,
    pub msg: String,
}

impl SyncResponse {
    pub fn ok() -> Self {
        Self {
            code: SYNC_OK,
            msg: "ok".to_string(),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == SYNC_OK
    }
}

/// Collections a sibling can be asked to list during bootstrap
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    MasterKey,
    ServiceAccess,
    RightTable,
    TrafficTable,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::MasterKey,
        Collection::ServiceAccess,
        Collection::RightTable,
        Collection::TrafficTable,
    ];

    /// RPC name, also the final path segment of the listing endpoint
    pub fn rpc_name(&self) -> &'static str {
        match self {
            Collection::MasterKey => "search_master_key",
            Collection::ServiceAccess => "search_service_access",
            Collection::RightTable => "search_right_table",
            Collection::TrafficTable => "search_traffic_table",
        }
    }
}

impl std::str::FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .iter()
            .find(|c| c.rpc_name() == s)
            .copied()
            .ok_or_else(|| format!("Unknown collection: {}", s))
    }
}

/// Bootstrap listing result; every item carries the collection's tag
pub type SearchPage = Page<ChangedObject>;

/// Paged listing with an optional `[begin, end)` update-time filter
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchQuery {
    #[serde(default)]
    pub begin: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offset: usize,
    pub limit: usize,
}

impl SearchQuery {
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            begin: None,
            end: None,
            offset,
            limit,
        }
    }
}
