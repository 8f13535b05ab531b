//! Right-table and traffic-table rows
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::instrument;

use super::state::AppState;
use crate::error::{GatewayError, Result};
use crate::policy::{PolicyKind, PolicyRecord, PolicyTable};

fn table(state: &AppState, name: &str) -> Result<Arc<PolicyTable>> {
    let kind: PolicyKind = name.parse().map_err(GatewayError::InvalidArgument)?;
    Ok(state.engine.stores().policy_table(kind).clone())
}

#[instrument(skip(state), level = "debug")]
pub async fn get_row(
    Path((table_name, id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<PolicyRecord>> {
    table(&state, &table_name)?
        .get(&id)?
        .map(Json)
        .ok_or_else(|| GatewayError::NotFound(format!("{} row {}", table_name, id)))
}

#[instrument(skip(state, content))]
pub async fn put_row(
    Path((table_name, id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(content): Json<serde_json::Value>,
) -> Result<Json<PolicyRecord>> {
    let record = PolicyRecord::new(&id, content);
    table(&state, &table_name)?.put(record.clone())?;
    Ok(Json(record))
}

#[instrument(skip(state))]
pub async fn delete_row(
    Path((table_name, id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<StatusCode> {
    if table(&state, &table_name)?.delete(&id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GatewayError::NotFound(format!("{} row {}", table_name, id)))
    }
}
