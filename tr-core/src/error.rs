//! Error types for the core library

use crate::model::RoomState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown vehicle preset: {0}")]
    UnknownPreset(String),

    #[error("invalid vehicle profile: {0}")]
    InvalidProfile(String),

    #[error("invalid room transition from {from:?} to {to:?}")]
    InvalidTransition { from: RoomState, to: RoomState },

    #[error("room is full ({max} players)")]
    RoomFull { max: usize },

    #[error("invalid identifier {0:?}: expected 1-64 characters of [A-Za-z0-9_-]")]
    InvalidId(String),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
