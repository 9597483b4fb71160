//! Type-safe wrappers for physical units
//!
//! These newtypes appear on the wire (`PlayerState`) and serialize as bare
//! JSON numbers. They are never rounded: a snapshot baseline must transplant
//! bit-for-bit into a physics model.

use serde::{Deserialize, Serialize};

/// Standard gravity (m/s²)
pub const GRAVITY: f64 = 9.81;

/// Air density at sea level (kg/m³)
pub const AIR_DENSITY: f64 = 1.225;

/// Meters along the one-dimensional track axis
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Meters(pub f64);

/// Meters per second
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetersPerSecond(pub f64);

impl MetersPerSecond {
    pub fn to_kph(self) -> KilometersPerHour {
        KilometersPerHour(self.0 * 3.6)
    }
}

/// Kilometers per hour
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KilometersPerHour(pub f64);

/// Revolutions per minute
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rpm(pub f64);

impl Rpm {
    /// Engine speed for a wheel turning at `omega` rad/s through `ratio`
    pub fn from_wheel_speed(omega: f64, ratio: f64) -> Self {
        Self(omega * ratio * 60.0 / (2.0 * std::f64::consts::PI))
    }
}

/// Fraction in [0.0, 1.0] (throttle, slip)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percentage(pub f64);

impl Percentage {
    /// Create a new percentage, clamping to [0.0, 1.0]. NaN maps to 0.0.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Get as percentage (0-100)
    pub fn as_percent(&self) -> f64 {
        self.0 * 100.0
    }
}
