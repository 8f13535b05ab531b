use std::sync::Arc;

use crate::auther::GatewayAuther;
use crate::credential::CredentialStore;
use crate::lifecycle::Lifecycle;
use crate::mesh::MeshEngine;

/// Shared by every handler; all members are cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MeshEngine>,
    pub auther: GatewayAuther,
    pub lifecycle: Arc<Lifecycle>,
}

impl AppState {
    pub fn new(engine: Arc<MeshEngine>, auther: GatewayAuther, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            engine,
            auther,
            lifecycle,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.engine.stores().credentials
    }
}
