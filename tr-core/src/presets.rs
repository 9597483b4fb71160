//! Named vehicle presets
//!
//! Profiles are built once and shared via `Arc`; every entity created from the
//! same preset points at the same immutable profile.

use crate::error::{CoreError, Result};
use crate::physics::{
    AeroSpec, Drivetrain, EngineSpec, TireSpec, TorqueCurve, Transmission, VehicleProfile,
};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

pub const DEFAULT_PRESET: &str = "rookie-rust-bucket";

static PRESETS: OnceLock<BTreeMap<&'static str, Arc<VehicleProfile>>> = OnceLock::new();

fn curve(points: &[(f64, f64)]) -> TorqueCurve {
    TorqueCurve::from_static(points)
}

fn rookie_rust_bucket() -> VehicleProfile {
    VehicleProfile {
        name: "rookie-rust-bucket".to_string(),
        mass: 2500.0,
        engine: EngineSpec {
            max_torque: 800.0,
            idle_rpm: 800.0,
            redline: 2200.0,
            torque_curve: curve(&[
                (800.0, 0.6),
                (1200.0, 0.85),
                (1600.0, 1.0),
                (2000.0, 0.9),
                (2200.0, 0.75),
            ]),
        },
        drivetrain: Drivetrain {
            gear_ratios: vec![12.0, 8.0, 5.5],
            final_drive: 4.0,
            transmission: Transmission::Auto,
        },
        tires: TireSpec {
            radius: 0.85,
            width: 0.45,
            grip: 0.7,
        },
        aero: AeroSpec {
            drag_coefficient: 0.9,
            frontal_area: 6.5,
        },
    }
}

fn midnight_thunder() -> VehicleProfile {
    VehicleProfile {
        name: "midnight-thunder".to_string(),
        mass: 3200.0,
        engine: EngineSpec {
            max_torque: 1800.0,
            idle_rpm: 800.0,
            redline: 3000.0,
            torque_curve: curve(&[
                (800.0, 0.5),
                (1500.0, 0.95),
                (2000.0, 1.0),
                (2500.0, 0.98),
                (3000.0, 0.85),
            ]),
        },
        drivetrain: Drivetrain {
            gear_ratios: vec![15.0, 10.0, 7.0, 5.0],
            final_drive: 3.5,
            transmission: Transmission::Auto,
        },
        tires: TireSpec {
            radius: 0.95,
            width: 0.60,
            grip: 0.85,
        },
        aero: AeroSpec {
            drag_coefficient: 0.75,
            frontal_area: 7.2,
        },
    }
}

fn registry() -> &'static BTreeMap<&'static str, Arc<VehicleProfile>> {
    PRESETS.get_or_init(|| {
        let mut map = BTreeMap::new();
        map.insert("rookie-rust-bucket", Arc::new(rookie_rust_bucket()));
        map.insert("midnight-thunder", Arc::new(midnight_thunder()));
        map
    })
}

/// Look up a preset by name
pub fn get(name: &str) -> Result<Arc<VehicleProfile>> {
    registry()
        .get(name)
        .cloned()
        .ok_or_else(|| CoreError::UnknownPreset(name.to_string()))
}

/// Names of all built-in presets, sorted
pub fn names() -> Vec<&'static str> {
    registry().keys().copied().collect()
}
