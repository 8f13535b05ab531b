use axum::{extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::state::AppState;
use crate::settings::{APP_NAME, APP_VERSION};

pub async fn root() -> &'static str {
    "gatemesh gateway node"
}

pub async fn health() -> &'static str {
    "OK"
}

#[derive(Serialize, Deserialize)]
pub struct AboutResponse {
    name: String,
    version: String,
    node_id: String,
}

#[instrument(skip(state))]
pub async fn about(State(state): State<AppState>) -> axum::Json<AboutResponse> {
    axum::Json(AboutResponse {
        name: APP_NAME.to_string(),
        version: APP_VERSION.to_string(),
        node_id: state.engine.node().id.clone(),
    })
}

/// Drop evictable caches on operator request
#[instrument(skip(state), level = "debug")]
pub async fn trim_caches(State(state): State<AppState>) -> StatusCode {
    state.lifecycle.trim_caches();
    StatusCode::OK
}
