//! Networking for Tractor Royale
//!
//! Peer transports (in-process mesh, direct UDP), the signaling client and
//! the replication manager that runs prediction and reconciliation on top.

pub mod direct;
pub mod error;
pub mod history;
pub mod mesh;
pub mod replication;
pub mod signaling;

pub use direct::{DirectConfig, DirectTransport};
pub use error::NetError;
pub use history::InputHistory;
pub use mesh::{LocalMesh, MeshConfig, MeshTransport};
pub use replication::{ReconcileOutcome, ReplicationConfig, ReplicationEvent, ReplicationManager, Role};
pub use signaling::{SignalingClient, SignalingEvent};
