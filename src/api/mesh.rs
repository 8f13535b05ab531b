//! Mesh endpoints: the signed RPCs siblings call, plus an operator view.
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use super::state::AppState;
use crate::auther::{RequestHeader, HEADER_AUTH, HEADER_NOISE, HEADER_SERVICE};
use crate::error::{AuthError, GatewayError, Result};
use crate::mesh::transport::rpc_service;
use crate::mesh::{
    Collection, NodeRef, SearchPage, SearchQuery, SiblingView, SyncRequest, SyncResponse,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct NodesResponse {
    pub node: NodeRef,
    pub known: Vec<NodeRef>,
    pub siblings: Vec<SiblingView>,
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Checks the signature and that it was made for this RPC
fn authenticate(state: &AppState, headers: &HeaderMap, rpc: &str) -> Result<()> {
    let header = RequestHeader {
        service: header_value(headers, HEADER_SERVICE),
        noise: header_value(headers, HEADER_NOISE),
        gateway_auth: header_value(headers, HEADER_AUTH),
    };
    if header.service != rpc_service(rpc) {
        return Err(AuthError::AuthFail.into());
    }
    state.auther.verify(&header)
}

#[instrument(skip(state), level = "debug")]
pub async fn nodes(State(state): State<AppState>) -> Json<NodesResponse> {
    Json(NodesResponse {
        node: state.engine.node().node_ref(),
        known: state.engine.known_nodes(),
        siblings: state.engine.siblings(),
    })
}

/// Failures travel in the response code so the caller can count them
#[instrument(skip_all, level = "debug")]
pub async fn sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SyncRequest>,
) -> Json<SyncResponse> {
    let result = authenticate(&state, &headers, "sync")
        .and_then(|_| state.engine.sync_from_brother(request));
    match result {
        Ok(()) => Json(SyncResponse::ok()),
        Err(e) => {
            warn!("Rejected sync: {}", e);
            Json(SyncResponse::error(e.mesh_code(), e.to_string()))
        }
    }
}

#[instrument(skip(state, headers), level = "debug")]
pub async fn search(
    Path(collection): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(query): Json<SearchQuery>,
) -> Result<Json<SearchPage>> {
    let collection: Collection = collection.parse().map_err(GatewayError::InvalidArgument)?;
    authenticate(&state, &headers, collection.rpc_name())?;
    state.engine.search(collection, &query).map(Json)
}
