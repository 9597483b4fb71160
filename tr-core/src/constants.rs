//! Game-wide tuning constants

/// Fixed simulation rate (Hz)
pub const TICK_RATE: u32 = 60;

/// Fixed simulation step (seconds)
pub const FIXED_DT: f64 = 1.0 / TICK_RATE as f64;

/// Replay ring capacity per local sender (~1 s at 60 Hz)
pub const INPUT_HISTORY_CAPACITY: usize = 60;

pub const MAX_PLAYERS: usize = 20;
pub const MIN_PLAYERS_FOR_RACE: usize = 2;

/// Track length (meters)
pub const TRACK_LENGTH: f64 = 100.0;

/// Countdown before the race starts (seconds)
pub const COUNTDOWN_DURATION: f64 = 3.0;

/// Frame callbacks after the finish during which the host repeats its final snapshot
pub const FINAL_SNAPSHOT_REPEATS: u32 = 120;

/// Idle engine speed shared by every preset (rpm)
pub const IDLE_RPM: f64 = 800.0;

pub const UPSHIFT_RPM_FRACTION: f64 = 0.85;
pub const DOWNSHIFT_RPM_FRACTION: f64 = 0.40;

/// Rolling resistance coefficient for tractor tyres on dirt
pub const ROLLING_RESISTANCE: f64 = 0.015;

/// Slip ratio at which the traction curve peaks
pub const PEAK_SLIP: f64 = 0.1;

/// Exponential decay rate of traction beyond peak slip
pub const SLIP_DECAY: f64 = 3.0;

/// Below this speed (m/s) slip is computed against static traction
pub const STATIC_LAUNCH_SPEED: f64 = 0.1;

pub const BOT_NAMES: [&str; 8] = [
    "Rusty Pete",
    "Farmer Joe",
    "Big Red",
    "Mudslinger",
    "Turbo Tom",
    "Daisy Duke",
    "Iron Horse",
    "Country Thunder",
];
