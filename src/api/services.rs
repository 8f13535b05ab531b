//! Service registration on this gateway
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::state::AppState;
use crate::error::{GatewayError, Result};
use crate::mesh::ServiceRef;

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServicesResponse {
    pub local: Vec<ServiceRef>,
    pub remote: Vec<ServiceRef>,
}

#[instrument(skip(state))]
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<StatusCode> {
    state.engine.register_service(ServiceRef {
        id: body.id,
        name: body.name,
        urls: body.urls,
        node_id: String::new(),
    })?;
    Ok(StatusCode::CREATED)
}

#[instrument(skip(state))]
pub async fn unregister(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode> {
    if state.engine.registry().unregister(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GatewayError::NotFound(format!("service {}", id)))
    }
}

#[instrument(skip(state), level = "debug")]
pub async fn list(State(state): State<AppState>) -> Json<ServicesResponse> {
    let registry = state.engine.registry();
    Json(ServicesResponse {
        local: registry.local_services(),
        remote: registry.remote_services(),
    })
}
