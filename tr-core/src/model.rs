//! Replicated race data model
//!
//! Everything here is shared verbatim between peers, so field names follow
//! the camelCase wire contract. Maps are ordered (`BTreeMap`) so that
//! iteration, and therefore simulation order, is identical on every peer.

use crate::constants::*;
use crate::error::{CoreError, Result};
use crate::physics::VehicleState;
use crate::units::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type PlayerId = String;

/// Returns true for ids that are safe to embed in a signaling URL
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn validate_id(id: &str) -> Result<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(CoreError::InvalidId(id.to_string()))
    }
}

// === Weather ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeatherType {
    #[default]
    Clear,
    Rain,
    Mud,
    Storm,
}

impl WeatherType {
    pub fn condition(self) -> WeatherCondition {
        let (grip_modifier, visibility_modifier) = match self {
            WeatherType::Clear => (1.0, 1.0),
            WeatherType::Rain => (0.7, 0.8),
            WeatherType::Mud => (0.5, 0.9),
            WeatherType::Storm => (0.4, 0.6),
        };
        WeatherCondition {
            kind: self,
            grip_modifier,
            visibility_modifier,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WeatherType::Clear => "Clear Skies",
            WeatherType::Rain => "Rainy",
            WeatherType::Mud => "Muddy Track",
            WeatherType::Storm => "Storm",
        }
    }
}

/// Grip and visibility multipliers attached to a physics model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherCondition {
    pub kind: WeatherType,
    pub grip_modifier: f64,
    pub visibility_modifier: f64,
}

impl Default for WeatherCondition {
    fn default() -> Self {
        WeatherType::Clear.condition()
    }
}

// === Inputs ===

/// One throttle sample from a local sender
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputSample {
    pub sequence: u64,
    pub throttle: f64,
    pub timestamp: f64,
}

// === Player state ===

/// Cosmetic part references carried by `join` messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TractorConfig {
    pub body_id: String,
    pub cab_id: String,
    pub wheels_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exhaust_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hat_id: Option<String>,
    pub paint_color: String,
    pub paint_metalness: f64,
    pub paint_roughness: f64,
    /// Physics preset this tractor drives with
    #[serde(default = "default_preset")]
    pub preset: String,
}

fn default_preset() -> String {
    crate::presets::DEFAULT_PRESET.to_string()
}

impl Default for TractorConfig {
    fn default() -> Self {
        Self {
            body_id: "body_rust_bucket".to_string(),
            cab_id: "cab_classic".to_string(),
            wheels_id: "wheels_tractor_standard".to_string(),
            exhaust_id: None,
            hat_id: None,
            paint_color: "#8B4513".to_string(),
            paint_metalness: 0.3,
            paint_roughness: 0.7,
            preset: default_preset(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerUpKind {
    Nitrous,
    OilSlick,
    SpeedMagnet,
    ChickenStampede,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerUp {
    #[serde(rename = "type")]
    pub kind: PowerUpKind,
    pub duration: f64,
    pub strength: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
}

/// Per-player entry of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub player_id: PlayerId,
    pub username: String,
    pub position: Meters,
    pub velocity: MetersPerSecond,
    pub throttle: Percentage,
    pub timestamp: f64,
    /// Last input sequence the host incorporated for this player
    pub input_sequence: u64,
    #[serde(default)]
    pub tractor_config: TractorConfig,
    #[serde(default)]
    pub power_ups: Vec<PowerUp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lap_time: Option<f64>,
    #[serde(default)]
    pub finished: bool,

    // Full drivetrain state, so a baseline is a complete transplant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpm: Option<Rpm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_gear: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wheel_slip: Option<f64>,
}

impl PlayerState {
    pub fn from_vehicle(player_id: &str, username: &str, state: &VehicleState) -> Self {
        Self {
            player_id: player_id.to_string(),
            username: username.to_string(),
            position: Meters(state.position),
            velocity: MetersPerSecond(state.velocity),
            throttle: Percentage(state.throttle),
            timestamp: 0.0,
            input_sequence: 0,
            tractor_config: TractorConfig::default(),
            power_ups: Vec::new(),
            lap_time: None,
            finished: false,
            rpm: Some(Rpm(state.rpm)),
            current_gear: Some(state.current_gear),
            wheel_slip: Some(state.wheel_slip),
        }
    }
}

/// Authoritative host snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub tick: u64,
    pub timestamp: f64,
    pub players: BTreeMap<PlayerId, PlayerState>,
}

// === Race / room ===

/// When a race counts as finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishRule {
    /// Every participating entity has reached the track length
    #[default]
    AllFinished,
    /// The first entity across the line ends the race
    FirstFinisher,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceConfig {
    pub track_length: f64,
    pub max_players: usize,
    #[serde(rename = "weatherType")]
    pub weather: WeatherType,
    pub power_ups_enabled: bool,
    /// Countdown duration (seconds)
    pub countdown: f64,
    #[serde(default)]
    pub finish_rule: FinishRule,
    /// Participant count that starts the countdown on its own
    #[serde(default)]
    pub auto_start_players: Option<usize>,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            track_length: TRACK_LENGTH,
            max_players: MAX_PLAYERS,
            weather: WeatherType::Clear,
            power_ups_enabled: true,
            countdown: COUNTDOWN_DURATION,
            finish_rule: FinishRule::AllFinished,
            auto_start_players: Some(MIN_PLAYERS_FOR_RACE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomState {
    Lobby,
    Countdown,
    Racing,
    Finished,
}

impl RoomState {
    fn can_transition_to(self, to: RoomState) -> bool {
        matches!(
            (self, to),
            (RoomState::Lobby, RoomState::Countdown)
                | (RoomState::Countdown, RoomState::Racing)
                | (RoomState::Racing, RoomState::Finished)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: String,
    pub host_id: PlayerId,
    pub participants: BTreeSet<PlayerId>,
    pub config: RaceConfig,
    pub state: RoomState,
}

impl Room {
    pub fn new(room_id: &str, host_id: &str, config: RaceConfig) -> Self {
        let mut participants = BTreeSet::new();
        participants.insert(host_id.to_string());
        Self {
            room_id: room_id.to_string(),
            host_id: host_id.to_string(),
            participants,
            config,
            state: RoomState::Lobby,
        }
    }

    /// Add a participant. Returns false if they were already present.
    pub fn add_participant(&mut self, id: &str) -> Result<bool> {
        if self.participants.contains(id) {
            return Ok(false);
        }
        if self.participants.len() >= self.config.max_players {
            return Err(CoreError::RoomFull {
                max: self.config.max_players,
            });
        }
        self.participants.insert(id.to_string());
        Ok(true)
    }

    pub fn remove_participant(&mut self, id: &str) -> bool {
        self.participants.remove(id)
    }

    /// True when the lobby has gathered enough players to count down
    pub fn should_auto_start(&self) -> bool {
        self.state == RoomState::Lobby
            && self
                .config
                .auto_start_players
                .map(|n| self.participants.len() >= n)
                .unwrap_or(false)
    }

    pub fn transition(&mut self, to: RoomState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(CoreError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}
