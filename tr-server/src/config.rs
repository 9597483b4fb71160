//! Engine and relay configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tr_core::constants::{FIXED_DT, INPUT_HISTORY_CAPACITY};
use tr_core::model::RaceConfig;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_ROOM_RETENTION_SECS: u64 = 60 * 60;
pub const DEFAULT_ROOM_SWEEP_SECS: u64 = 5 * 60;
pub const DEFAULT_MAX_CATCH_UP_TICKS: u32 = 60;
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// Log a line per rendered frame
    #[default]
    Tracing,
    /// Keep frames in memory
    Headless,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Simulation step (seconds)
    pub fixed_step: f64,
    /// Ticks a single frame may run before excess time is discarded
    pub max_catch_up_ticks: u32,
    pub input_history: usize,
    pub renderer: RendererKind,
    /// Seed for bot personalities; random when absent
    pub seed: Option<u64>,
    /// Frame interval of the async driver (milliseconds)
    pub frame_interval_ms: u64,
    pub race: RaceConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fixed_step: FIXED_DT,
            max_catch_up_ticks: DEFAULT_MAX_CATCH_UP_TICKS,
            input_history: INPUT_HISTORY_CAPACITY,
            renderer: RendererKind::Tracing,
            seed: None,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
            race: RaceConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

/// Signaling relay settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// How long an empty room is kept before it is reclaimed
    pub room_retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            room_retention: Duration::from_secs(DEFAULT_ROOM_RETENTION_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_ROOM_SWEEP_SECS),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = read_u64(&lookup, "PORT", DEFAULT_PORT as u64);
        let port = u16::try_from(port).unwrap_or_else(|_| {
            warn!("PORT {} is out of range, using {}", port, DEFAULT_PORT);
            DEFAULT_PORT
        });
        Self {
            port,
            room_retention: Duration::from_secs(read_u64(
                &lookup,
                "ROOM_RETENTION_SECS",
                DEFAULT_ROOM_RETENTION_SECS,
            )),
            sweep_interval: Duration::from_secs(read_u64(&lookup, "ROOM_SWEEP_SECS", DEFAULT_ROOM_SWEEP_SECS)),
        }
    }
}

fn read_u64(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> u64 {
    match lookup(name) {
        None => default,
        Some(value) => match value.trim().parse::<u64>() {
            Ok(parsed) if parsed > 0 => parsed,
            _ => {
                warn!("Invalid {}={:?}, using default {}", name, value, default);
                default
            }
        },
    }
}
