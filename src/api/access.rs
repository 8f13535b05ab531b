//! Credential administration
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::state::AppState;
use crate::credential::{Access, IssuedAccess};
use crate::error::{GatewayError, Result};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

/// Public view of a credential. The key is only ever returned on issue.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessView {
    pub id: String,
    pub master_key_id: String,
    pub valid: bool,
    pub summary: String,
    pub create_time: DateTime<Utc>,
}

impl From<&Access> for AccessView {
    fn from(access: &Access) -> Self {
        Self {
            id: access.id().to_string(),
            master_key_id: access.master_key_id().to_string(),
            valid: access.is_valid(),
            summary: access.summary(),
            create_time: access.create_time(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StateBody {
    pub valid: bool,
}

#[derive(Debug, Deserialize)]
pub struct SummaryBody {
    pub summary: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub group_id: Option<String>,
    pub keyword: Option<String>,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

#[instrument(skip(state))]
pub async fn issue_access(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<IssuedAccess>)> {
    let issued = state.credentials().issue_access(&group_id)?;
    info!("Issued access {} for group {}", issued.id, group_id);
    Ok((StatusCode::CREATED, Json(issued)))
}

#[instrument(skip(state), level = "debug")]
pub async fn get_access(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AccessView>> {
    state
        .credentials()
        .get_access(&id)?
        .map(|access| Json(AccessView::from(&access)))
        .ok_or_else(|| GatewayError::NotFound(format!("access {}", id)))
}

#[instrument(skip(state))]
pub async fn set_state(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<StateBody>,
) -> Result<Json<AccessView>> {
    let access = state.credentials().set_access_state(&id, body.valid)?;
    Ok(Json(AccessView::from(&access)))
}

#[instrument(skip(state, body))]
pub async fn set_summary(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<SummaryBody>,
) -> Result<Json<AccessView>> {
    let access = state.credentials().set_access_summary(&id, &body.summary)?;
    Ok(Json(AccessView::from(&access)))
}

#[instrument(skip(state), level = "debug")]
pub async fn list_access(
    Query(params): Query<ListParams>,
    State(state): State<AppState>,
) -> Result<Json<Vec<AccessView>>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let mut pages = state.credentials().list_access(
        params.group_id.as_deref(),
        params.keyword.as_deref(),
        limit,
    )?;

    let mut skipped = 0;
    let mut views = Vec::with_capacity(limit);
    while let Some(page) = pages.next_page()? {
        for access in page {
            if skipped < params.offset {
                skipped += 1;
                continue;
            }
            views.push(AccessView::from(&access));
            if views.len() == limit {
                return Ok(Json(views));
            }
        }
    }
    Ok(Json(views))
}
