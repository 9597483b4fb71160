//! Tractor Royale server library
//!
//! Game engine, fixed-step scheduler, renderer and profile backends, and the
//! signaling relay. Exposed as a library for the binaries and integration tests.

pub mod config;
pub mod engine;
pub mod profiles;
pub mod reaper;
pub mod render;
pub mod scheduler;
pub mod signaling;
pub mod state;

pub use config::{EngineConfig, RendererKind, ServerConfig};
pub use engine::{Controller, FrameReport, GameEngine, RaceResult};
pub use profiles::FileProfileStore;
pub use state::RelayState;
