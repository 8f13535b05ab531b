//! Mesh RPC transport.
//!
//! `MeshConnector` hands out one `MeshClient` per sibling. The HTTP client
//! signs every call with this gateway's internal credential and tries the
//! sibling's URLs in order until one answers.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::engine::MeshEngine;
use super::messages::{Collection, NodeRef, SearchPage, SearchQuery, SyncRequest, SyncResponse};
use crate::auther::{GatewayAuther, RequestHeader, HEADER_AUTH, HEADER_NOISE, HEADER_SERVICE};
use crate::error::{MeshError, Result};

/// Auth type used when signing mesh RPCs
pub const MESH_AUTH_TYPE: &str = "MESH";

pub const SYNC_PATH: &str = "/mesh/sync";
pub const SEARCH_PATH: &str = "/mesh/search";

/// Signed service name for a mesh RPC
pub fn rpc_service(rpc: &str) -> String {
    format!("mesh.{}", rpc)
}

#[async_trait]
pub trait MeshClient: Send + Sync {
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse>;

    async fn search(&self, collection: Collection, query: &SearchQuery) -> Result<SearchPage>;
}

pub trait MeshConnector: Send + Sync {
    fn connect(&self, node: &NodeRef) -> Arc<dyn MeshClient>;
}

pub struct HttpMeshConnector {
    http: reqwest::Client,
    auther: GatewayAuther,
}

impl HttpMeshConnector {
    pub fn new(auther: GatewayAuther, connect_timeout: Duration, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { http, auther })
    }
}

impl MeshConnector for HttpMeshConnector {
    fn connect(&self, node: &NodeRef) -> Arc<dyn MeshClient> {
        Arc::new(HttpMeshClient {
            node: node.clone(),
            http: self.http.clone(),
            auther: self.auther.clone(),
        })
    }
}

pub struct HttpMeshClient {
    node: NodeRef,
    http: reqwest::Client,
    auther: GatewayAuther,
}

impl HttpMeshClient {
    async fn post_json<B, R>(&self, path: &str, rpc: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut last_error = MeshError::NoEndpoint(self.node.id.clone());
        for base in &self.node.urls {
            let mut header = RequestHeader::for_service(&rpc_service(rpc));
            self.auther.generate(MESH_AUTH_TYPE, &mut header)?;

            let url = format!("{}{}", base, path);
            let sent = self
                .http
                .post(&url)
                .header(HEADER_SERVICE, &header.service)
                .header(HEADER_NOISE, &header.noise)
                .header(HEADER_AUTH, &header.gateway_auth)
                .json(body)
                .send()
                .await;
            let resp = match sent {
                Ok(resp) => resp,
                Err(e) => {
                    debug!("[{}] {} unreachable: {}", self.node.id, url, e);
                    last_error = MeshError::Network(e.to_string());
                    continue;
                }
            };
            let status = resp.status();
            if !status.is_success() {
                let msg = resp.text().await.unwrap_or_default();
                return Err(MeshError::Remote {
                    code: i32::from(status.as_u16()),
                    msg,
                }
                .into());
            }
            return resp.json().await.map_err(Into::into);
        }
        Err(last_error.into())
    }
}

#[async_trait]
impl MeshClient for HttpMeshClient {
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse> {
        self.post_json(SYNC_PATH, "sync", request).await
    }

    async fn search(&self, collection: Collection, query: &SearchQuery) -> Result<SearchPage> {
        let path = format!("{}/{}", SEARCH_PATH, collection.rpc_name());
        self.post_json(&path, collection.rpc_name(), query).await
    }
}

/// In-process transport: delivers calls straight to engines registered in
/// the same process. Nodes can be marked down to simulate partitions.
#[derive(Clone, Default)]
pub struct LocalMeshConnector {
    inner: Arc<LocalMesh>,
}

#[derive(Default)]
struct LocalMesh {
    engines: RwLock<HashMap<String, Weak<MeshEngine>>>,
    down: RwLock<HashSet<String>>,
}

impl LocalMeshConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, engine: &Arc<MeshEngine>) {
        self.inner
            .engines
            .write()
            .insert(engine.node().id.clone(), Arc::downgrade(engine));
    }

    pub fn set_down(&self, node_id: &str, down: bool) {
        let mut nodes = self.inner.down.write();
        if down {
            nodes.insert(node_id.to_string());
        } else {
            nodes.remove(node_id);
        }
    }
}

impl MeshConnector for LocalMeshConnector {
    fn connect(&self, node: &NodeRef) -> Arc<dyn MeshClient> {
        Arc::new(LocalMeshClient {
            node_id: node.id.clone(),
            mesh: self.inner.clone(),
        })
    }
}

struct LocalMeshClient {
    node_id: String,
    mesh: Arc<LocalMesh>,
}

impl LocalMeshClient {
    fn target(&self) -> Result<Arc<MeshEngine>> {
        if self.mesh.down.read().contains(&self.node_id) {
            return Err(MeshError::Network(format!("{} is down", self.node_id)).into());
        }
        self.mesh
            .engines
            .read()
            .get(&self.node_id)
            .and_then(Weak::upgrade)
            .ok_or_else(|| MeshError::NoEndpoint(self.node_id.clone()).into())
    }
}

#[async_trait]
impl MeshClient for LocalMeshClient {
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse> {
        let engine = self.target()?;
        Ok(match engine.sync_from_brother(request.clone()) {
            Ok(()) => SyncResponse::ok(),
            Err(e) => SyncResponse::error(e.mesh_code(), e.to_string()),
        })
    }

    async fn search(&self, collection: Collection, query: &SearchQuery) -> Result<SearchPage> {
        self.target()?.search(collection, query)
    }
}
