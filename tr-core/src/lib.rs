//! Tractor Royale Core Library
//!
//! This crate provides the deterministic vehicle physics, race data model,
//! wire protocol and the capability traits (transport, renderer, storage)
//! shared by every peer.

pub mod agent;
pub mod constants;
pub mod error;
pub mod input;
pub mod model;
pub mod physics;
pub mod presets;
pub mod protocol;
pub mod render;
pub mod storage;
pub mod transport;
pub mod units;

pub use agent::AutonomousAgent;
pub use error::{CoreError, Result};
pub use model::{PlayerId, PlayerState, RaceConfig, Room, RoomState, StateSnapshot};
pub use physics::{PhysicsModel, VehicleProfile, VehicleState};
pub use protocol::GameMessage;
pub use render::Renderer;
pub use storage::ProfileStore;
pub use transport::{PeerTransport, TransportEvent};
