//! Player profile persistence
//!
//! Stores are plain handles passed to whoever needs them; there is no
//! process-wide accessor.

use crate::model::{PlayerId, TractorConfig};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerStatistics {
    pub total_races: u32,
    pub wins: u32,
    pub podium_finishes: u32,
    /// meters
    pub total_distance: f64,
    /// seconds
    pub best_lap_time: Option<f64>,
}

/// Outcome of one race for one player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaceRecord {
    /// 1-based finishing place, `None` if the player did not finish
    pub placement: Option<usize>,
    pub distance: f64,
    pub finish_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub player_id: PlayerId,
    pub username: String,
    #[serde(default)]
    pub equipped_tractor: TractorConfig,
    #[serde(default)]
    pub statistics: PlayerStatistics,
    pub created_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

impl PlayerProfile {
    pub fn new(player_id: &str, username: &str) -> Self {
        let now = Utc::now();
        Self {
            player_id: player_id.to_string(),
            username: username.to_string(),
            equipped_tractor: TractorConfig::default(),
            statistics: PlayerStatistics::default(),
            created_at: now,
            last_login_at: now,
        }
    }

    pub fn record_race(&mut self, record: RaceRecord) {
        let stats = &mut self.statistics;
        stats.total_races += 1;
        stats.total_distance += record.distance.max(0.0);

        if let Some(place) = record.placement {
            if place == 1 {
                stats.wins += 1;
            }
            if place <= 3 {
                stats.podium_finishes += 1;
            }
        }
        if let Some(time) = record.finish_time {
            stats.best_lap_time = Some(match stats.best_lap_time {
                Some(best) => best.min(time),
                None => time,
            });
        }
    }
}

pub trait ProfileStore: Send + Sync {
    fn load(&self, player_id: &str) -> Result<Option<PlayerProfile>>;

    fn save(&self, profile: &PlayerProfile) -> Result<()>;
}

/// Volatile store for tests and guests
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<BTreeMap<PlayerId, PlayerProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProfileStore for MemoryProfileStore {
    fn load(&self, player_id: &str) -> Result<Option<PlayerProfile>> {
        let profiles = self.profiles.lock().map_err(|_| anyhow!("profile store poisoned"))?;
        Ok(profiles.get(player_id).cloned())
    }

    fn save(&self, profile: &PlayerProfile) -> Result<()> {
        let mut profiles = self.profiles.lock().map_err(|_| anyhow!("profile store poisoned"))?;
        profiles.insert(profile.player_id.clone(), profile.clone());
        Ok(())
    }
}
