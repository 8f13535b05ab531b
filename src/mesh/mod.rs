//! Gateway mesh: sibling tracking, service registry and the gossip engine
//! that replicates credentials and policy tables between gateways.
pub mod engine;
pub mod messages;
pub mod node;
pub mod queue;
pub mod registry;
pub mod transport;

pub use engine::{GossipOutcome, MeshEngine, MeshStores};
pub use messages::{
    ChangedObject, Collection, NodeRef, SearchPage, SearchQuery, ServiceRef, SyncRequest,
    SyncResponse,
};
pub use node::{GatewayNode, SiblingNode, SiblingView};
pub use queue::{ChangedBatch, ChangedObjectQueue};
pub use registry::{ServiceDeltas, ServiceRegistry};
pub use transport::{HttpMeshConnector, LocalMeshConnector, MeshClient, MeshConnector};
