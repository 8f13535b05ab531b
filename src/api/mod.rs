pub mod access;
mod base;
mod mesh;
mod policy;
mod services;
pub mod state;

use std::borrow::Cow;

use axum::{
    error_handling::HandleErrorLayer, http::StatusCode, response::IntoResponse, routing, Router,
};
use tokio::time::Duration;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;

pub mod paths;

pub use state::AppState;

/// Build the node's HTTP API: administration endpoints plus the mesh RPCs
pub fn api(state: AppState) -> Router {
    Router::new()
        .route(paths::base::ROOT, routing::get(base::root))
        .route(paths::base::HEALTH, routing::get(base::health))
        .route(paths::base::ABOUT, routing::get(base::about))
        .route(paths::TRIM_CACHES, routing::post(base::trim_caches))
        // Credentials
        .route(paths::access::LIST, routing::get(access::list_access))
        .route(
            paths::access::ONE,
            routing::get(access::get_access).post(access::issue_access),
        )
        .route(paths::access::STATE, routing::put(access::set_state))
        .route(paths::access::SUMMARY, routing::put(access::set_summary))
        // Services
        .route(
            paths::services::ALL,
            routing::get(services::list).post(services::register),
        )
        .route(paths::services::ONE, routing::delete(services::unregister))
        // Policy tables
        .route(
            paths::policy::ROW,
            routing::get(policy::get_row)
                .put(policy::put_row)
                .delete(policy::delete_row),
        )
        // Mesh
        .route(paths::mesh::NODES, routing::get(mesh::nodes))
        .route(paths::mesh::SYNC, routing::post(mesh::sync))
        .route(paths::mesh::SEARCH, routing::post(mesh::search))
        .layer(
            ServiceBuilder::new()
                // Handle errors from middleware
                .layer(HandleErrorLayer::new(handle_error))
                .load_shed()
                .timeout(Duration::from_secs(10)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_error(error: BoxError) -> impl IntoResponse {
    if error.is::<tower::timeout::error::Elapsed>() {
        return (StatusCode::REQUEST_TIMEOUT, Cow::from("request timed out"));
    }

    if error.is::<tower::load_shed::error::Overloaded>() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Cow::from("service is overloaded, try again later"),
        );
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Cow::from(format!("Unhandled internal error: {}", error)),
    )
}
