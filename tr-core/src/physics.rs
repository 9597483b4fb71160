//! Deterministic longitudinal tractor physics
//!
//! A single `PhysicsModel` owns the state of one entity. `update` is a pure
//! function of (state, profile, weather, dt, throttle): identical call
//! sequences produce bit-identical states on every peer, which is what makes
//! rollback-and-replay reconciliation possible.
//!
//! Per tick, in order:
//! 1. Auto transmission (at most one shift)
//! 2. Engine torque from the interpolated torque curve
//! 3. Wheel torque through gear and final drive
//! 4. Tyre force with a simplified slip curve (peak grip at 10% slip)
//! 5. Aerodynamic drag and rolling resistance
//! 6. Forward Euler integration
//! 7. RPM resync from wheel speed

use crate::constants::*;
use crate::error::{CoreError, Result};
use crate::model::{PlayerState, WeatherCondition};
use crate::units::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Vehicle profile
// =============================================================================

/// Ordered (rpm, torque fraction) control points spanning idle to redline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<(f64, f64)>", into = "Vec<(f64, f64)>")]
pub struct TorqueCurve {
    points: Vec<(f64, f64)>,
}

impl TorqueCurve {
    pub fn new(points: Vec<(f64, f64)>) -> Result<Self> {
        if points.len() < 2 {
            return Err(CoreError::InvalidProfile(
                "torque curve needs at least two points".to_string(),
            ));
        }
        if points.iter().any(|(rpm, frac)| !rpm.is_finite() || !frac.is_finite()) {
            return Err(CoreError::InvalidProfile(
                "torque curve points must be finite".to_string(),
            ));
        }
        if points.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(CoreError::InvalidProfile(
                "torque curve rpm must be strictly ascending".to_string(),
            ));
        }
        Ok(Self { points })
    }

    /// Built-in curves only; checked by the preset tests instead of at runtime
    pub(crate) fn from_static(points: &[(f64, f64)]) -> Self {
        debug_assert!(points.len() >= 2 && points.windows(2).all(|w| w[0].0 < w[1].0));
        Self {
            points: points.to_vec(),
        }
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// Torque fraction at `rpm`, clamped to the curve's domain
    pub fn fraction_at(&self, rpm: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        let rpm = if rpm.is_nan() {
            first.0
        } else {
            rpm.clamp(first.0, last.0)
        };

        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if rpm <= hi.0 {
                let t = (rpm - lo.0) / (hi.0 - lo.0);
                return lo.1 + t * (hi.1 - lo.1);
            }
        }
        last.1
    }
}

impl TryFrom<Vec<(f64, f64)>> for TorqueCurve {
    type Error = CoreError;

    fn try_from(points: Vec<(f64, f64)>) -> Result<Self> {
        Self::new(points)
    }
}

impl From<TorqueCurve> for Vec<(f64, f64)> {
    fn from(curve: TorqueCurve) -> Self {
        curve.points
    }
}

fn default_idle_rpm() -> f64 {
    IDLE_RPM
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSpec {
    /// Peak torque (Nm)
    pub max_torque: f64,
    #[serde(default = "default_idle_rpm")]
    pub idle_rpm: f64,
    pub redline: f64,
    pub torque_curve: TorqueCurve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transmission {
    Auto,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drivetrain {
    pub gear_ratios: Vec<f64>,
    pub final_drive: f64,
    pub transmission: Transmission,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TireSpec {
    /// meters
    pub radius: f64,
    /// meters
    pub width: f64,
    /// Friction coefficient before weather
    pub grip: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AeroSpec {
    pub drag_coefficient: f64,
    /// m²
    pub frontal_area: f64,
}

/// Immutable vehicle description, shared by every entity using the preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub name: String,
    /// kg
    pub mass: f64,
    pub engine: EngineSpec,
    pub drivetrain: Drivetrain,
    pub tires: TireSpec,
    pub aero: AeroSpec,
}

impl VehicleProfile {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(CoreError::InvalidProfile(format!("{}: {}", self.name, msg)));

        if !(self.mass > 0.0) {
            return invalid("mass must be positive");
        }
        if !(self.tires.radius > 0.0) {
            return invalid("tire radius must be positive");
        }
        if self.drivetrain.gear_ratios.is_empty() || self.drivetrain.gear_ratios.len() > u8::MAX as usize {
            return invalid("drivetrain needs between 1 and 255 gears");
        }
        if !(self.engine.idle_rpm > 0.0) || self.engine.redline <= self.engine.idle_rpm {
            return invalid("redline must exceed a positive idle rpm");
        }
        Ok(())
    }

    pub fn gear_count(&self) -> u8 {
        self.drivetrain.gear_ratios.len() as u8
    }

    /// Ratio for a 1-based gear, clamped to the gearbox. An empty gearbox is direct drive.
    pub fn gear_ratio(&self, gear: u8) -> f64 {
        let ratios = &self.drivetrain.gear_ratios;
        let index = (gear.max(1) as usize - 1).min(ratios.len().saturating_sub(1));
        ratios.get(index).copied().unwrap_or(1.0)
    }
}

// =============================================================================
// Vehicle state
// =============================================================================

/// Mutable per-entity state, advanced once per fixed tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleState {
    /// Meters from the start line
    pub position: f64,
    /// m/s, never negative
    pub velocity: f64,
    pub rpm: f64,
    pub throttle: f64,
    /// 0 = full grip, 1 = full spin
    pub wheel_slip: f64,
    /// 1-based
    pub current_gear: u8,
}

impl VehicleState {
    pub fn at_rest(profile: &VehicleProfile) -> Self {
        Self {
            position: 0.0,
            velocity: 0.0,
            rpm: profile.engine.idle_rpm,
            throttle: 0.0,
            wheel_slip: 0.0,
            current_gear: 1,
        }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

// =============================================================================
// PhysicsModel
// =============================================================================

#[derive(Debug, Clone)]
pub struct PhysicsModel {
    profile: Arc<VehicleProfile>,
    state: VehicleState,
    weather: WeatherCondition,
}

impl PhysicsModel {
    /// Fails with `CoreError::InvalidProfile` if the profile does not validate
    pub fn new(profile: Arc<VehicleProfile>) -> Result<Self> {
        profile.validate()?;
        let state = VehicleState::at_rest(&profile);
        Ok(Self {
            profile,
            state,
            weather: WeatherCondition::default(),
        })
    }

    /// Advance the whole state by exactly `dt` seconds.
    ///
    /// Throttle is clamped to [0, 1]; a non-positive or non-finite `dt` is a no-op.
    pub fn update(&mut self, dt: f64, input_throttle: f64) {
        if !(dt > 0.0) || !dt.is_finite() {
            return;
        }

        self.state.throttle = Percentage::new(input_throttle).0;

        if self.profile.drivetrain.transmission == Transmission::Auto {
            self.update_auto_transmission();
        }

        let engine_torque = self.engine_torque();
        let wheel_torque = self.wheel_torque(engine_torque);

        let (traction_force, slip_ratio) = self.tire_forces(wheel_torque);
        self.state.wheel_slip = slip_ratio;

        let net_force = traction_force - self.drag() - self.rolling_resistance();
        let acceleration = net_force / self.profile.mass;

        self.state.velocity = (self.state.velocity + acceleration * dt).max(0.0);
        self.state.position += self.state.velocity * dt;

        self.sync_rpm();
    }

    fn update_auto_transmission(&mut self) {
        let gear_count = self.profile.gear_count();
        let redline = self.profile.engine.redline;

        if self.state.rpm > redline * UPSHIFT_RPM_FRACTION && self.state.current_gear < gear_count {
            self.state.current_gear += 1;
        } else if self.state.rpm < redline * DOWNSHIFT_RPM_FRACTION && self.state.current_gear > 1 {
            self.state.current_gear -= 1;
        }
    }

    fn engine_torque(&self) -> f64 {
        let fraction = self.profile.engine.torque_curve.fraction_at(self.state.rpm);
        self.profile.engine.max_torque * fraction * self.state.throttle
    }

    fn wheel_torque(&self, engine_torque: f64) -> f64 {
        engine_torque * self.profile.gear_ratio(self.state.current_gear) * self.profile.drivetrain.final_drive
    }

    /// Returns (traction force, slip ratio)
    fn tire_forces(&self, wheel_torque: f64) -> (f64, f64) {
        let mass = self.profile.mass;
        let normal_force = mass * GRAVITY;
        let max_traction = normal_force * self.profile.tires.grip * self.weather.grip_modifier;

        let theoretical_force = wheel_torque / self.profile.tires.radius;
        let velocity = self.state.velocity;

        let slip_ratio = if velocity > STATIC_LAUNCH_SPEED {
            let theoretical_speed = theoretical_force / mass;
            (theoretical_speed - velocity).abs() / velocity
        } else if max_traction > 0.0 {
            theoretical_force / max_traction
        } else if theoretical_force > 0.0 {
            1.0
        } else {
            0.0
        };
        let slip_ratio = finite_or(slip_ratio, 0.0).clamp(0.0, 1.0);

        let traction_multiplier = if slip_ratio < PEAK_SLIP {
            slip_ratio / PEAK_SLIP
        } else {
            (-(slip_ratio - PEAK_SLIP) * SLIP_DECAY).exp()
        };

        let traction_force = theoretical_force.min(max_traction * traction_multiplier);
        (traction_force, slip_ratio)
    }

    fn drag(&self) -> f64 {
        let v = self.state.velocity;
        0.5 * AIR_DENSITY * v * v * self.profile.aero.drag_coefficient * self.profile.aero.frontal_area
    }

    fn rolling_resistance(&self) -> f64 {
        ROLLING_RESISTANCE * self.profile.mass * GRAVITY
    }

    fn sync_rpm(&mut self) {
        let wheel_omega = self.state.velocity / self.profile.tires.radius;
        let ratio = self.profile.gear_ratio(self.state.current_gear) * self.profile.drivetrain.final_drive;
        let rpm = Rpm::from_wheel_speed(wheel_omega, ratio).0;
        self.state.rpm = rpm.clamp(self.profile.engine.idle_rpm, self.profile.engine.redline);
    }

    // === Manual transmission ===

    /// Shift up one gear (manual gearboxes). Returns false at top gear.
    pub fn shift_up(&mut self) -> bool {
        if self.state.current_gear < self.profile.gear_count() {
            self.state.current_gear += 1;
            true
        } else {
            false
        }
    }

    /// Shift down one gear (manual gearboxes). Returns false in first gear.
    pub fn shift_down(&mut self) -> bool {
        if self.state.current_gear > 1 {
            self.state.current_gear -= 1;
            true
        } else {
            false
        }
    }

    // === State transplant ===

    /// Replace the state, re-clamping every field to its invariant
    pub fn restore(&mut self, state: VehicleState) {
        let engine = &self.profile.engine;
        self.state = VehicleState {
            position: finite_or(state.position, 0.0),
            velocity: finite_or(state.velocity, 0.0).max(0.0),
            rpm: finite_or(state.rpm, engine.idle_rpm).clamp(engine.idle_rpm, engine.redline),
            throttle: Percentage::new(state.throttle).0,
            wheel_slip: Percentage::new(state.wheel_slip).0,
            current_gear: state.current_gear.clamp(1, self.profile.gear_count()),
        };
    }

    /// Adopt an authoritative snapshot entry as the new full baseline
    pub fn rebase(&mut self, baseline: &PlayerState) {
        let current_gear = baseline.current_gear.unwrap_or(1);
        let velocity = baseline.velocity.0;
        let rpm = match baseline.rpm {
            Some(rpm) => rpm.0,
            None => {
                let omega = velocity.max(0.0) / self.profile.tires.radius;
                let ratio = self.profile.gear_ratio(current_gear) * self.profile.drivetrain.final_drive;
                Rpm::from_wheel_speed(omega, ratio).0
            }
        };
        self.restore(VehicleState {
            position: baseline.position.0,
            velocity,
            rpm,
            throttle: baseline.throttle.0,
            wheel_slip: baseline.wheel_slip.unwrap_or(0.0),
            current_gear,
        });
    }

    /// Lossless JSON encoding of the state
    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.state)?)
    }

    pub fn deserialize(&mut self, data: &str) -> Result<()> {
        let state: VehicleState = serde_json::from_str(data)?;
        self.restore(state);
        Ok(())
    }

    // === Accessors ===

    /// A copy of the current state
    pub fn state(&self) -> VehicleState {
        self.state
    }

    pub fn profile(&self) -> &Arc<VehicleProfile> {
        &self.profile
    }

    pub fn set_weather(&mut self, weather: WeatherCondition) {
        self.weather = WeatherCondition {
            grip_modifier: finite_or(weather.grip_modifier, 1.0).max(0.0),
            ..weather
        };
    }

    pub fn weather(&self) -> WeatherCondition {
        self.weather
    }

    pub fn position(&self) -> f64 {
        self.state.position
    }

    pub fn velocity(&self) -> f64 {
        self.state.velocity
    }

    pub fn speed_kph(&self) -> f64 {
        MetersPerSecond(self.state.velocity).to_kph().0
    }

    pub fn rpm(&self) -> f64 {
        self.state.rpm
    }

    pub fn wheel_slip(&self) -> f64 {
        self.state.wheel_slip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WeatherType;
    use crate::presets;

    fn rookie() -> PhysicsModel {
        PhysicsModel::new(presets::get("rookie-rust-bucket").unwrap()).unwrap()
    }

    fn run(model: &mut PhysicsModel, ticks: usize, throttle: f64) {
        for _ in 0..ticks {
            model.update(FIXED_DT, throttle);
        }
    }

    #[test]
    fn test_torque_curve_interpolates_segment_midpoint() {
        let curve = TorqueCurve::new(vec![(800.0, 0.6), (1600.0, 1.0), (2200.0, 0.75)]).unwrap();
        assert!((curve.fraction_at(1200.0) - 0.8).abs() < 1e-12);
        assert!((curve.fraction_at(1600.0) - 1.0).abs() < 1e-12);
        assert!((curve.fraction_at(1900.0) - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_torque_curve_clamps_outside_domain() {
        let curve = TorqueCurve::new(vec![(800.0, 0.6), (1600.0, 1.0), (2200.0, 0.75)]).unwrap();
        assert_eq!(curve.fraction_at(100.0), 0.6);
        assert_eq!(curve.fraction_at(9000.0), 0.75);
        assert_eq!(curve.fraction_at(f64::NAN), 0.6);
    }

    #[test]
    fn test_torque_curve_rejects_bad_points() {
        assert!(TorqueCurve::new(vec![(800.0, 0.6)]).is_err());
        assert!(TorqueCurve::new(vec![(800.0, 0.6), (800.0, 0.7)]).is_err());
        assert!(TorqueCurve::new(vec![(1600.0, 1.0), (800.0, 0.6)]).is_err());
        assert!(serde_json::from_str::<TorqueCurve>("[[800, 0.6]]").is_err());
    }

    #[test]
    fn test_torque_curve_serializes_as_pairs() {
        let curve = TorqueCurve::new(vec![(800.0, 0.6), (1600.0, 1.0)]).unwrap();
        let json = serde_json::to_string(&curve).unwrap();
        assert_eq!(json, "[[800.0,0.6],[1600.0,1.0]]");
    }

    #[test]
    fn test_new_model_starts_at_rest_in_first_gear() {
        let model = rookie();
        let state = model.state();
        assert_eq!(state.position, 0.0);
        assert_eq!(state.velocity, 0.0);
        assert_eq!(state.rpm, IDLE_RPM);
        assert_eq!(state.current_gear, 1);
    }

    #[test]
    fn test_launch_at_full_throttle_slips_but_moves() {
        // mass 2500 kg, grip 0.7, clear weather
        let mut model = rookie();
        model.update(FIXED_DT, 1.0);
        let state = model.state();
        assert!(state.wheel_slip > 0.0, "slip was {}", state.wheel_slip);
        assert!(state.velocity > 0.0, "velocity was {}", state.velocity);
        assert!(state.position > 0.0);
    }

    #[test]
    fn test_zero_throttle_stays_put() {
        let mut model = rookie();
        run(&mut model, 120, 0.0);
        let state = model.state();
        assert_eq!(state.velocity, 0.0);
        assert_eq!(state.position, 0.0);
        assert_eq!(state.wheel_slip, 0.0);
    }

    #[test]
    fn test_update_is_deterministic() {
        let throttles: Vec<f64> = (0..600).map(|i| ((i * 37) % 100) as f64 / 100.0).collect();

        let mut a = rookie();
        let mut b = rookie();
        for &t in &throttles {
            a.update(FIXED_DT, t);
            b.update(FIXED_DT, t);
        }

        let (sa, sb) = (a.state(), b.state());
        assert_eq!(sa.position.to_bits(), sb.position.to_bits());
        assert_eq!(sa.velocity.to_bits(), sb.velocity.to_bits());
        assert_eq!(sa.rpm.to_bits(), sb.rpm.to_bits());
        assert_eq!(sa.wheel_slip.to_bits(), sb.wheel_slip.to_bits());
        assert_eq!(sa, sb);
    }

    #[test]
    fn test_invariants_hold_under_hostile_inputs() {
        let mut model = PhysicsModel::new(presets::get("midnight-thunder").unwrap()).unwrap();
        let inputs = [1.0, -3.0, 7.5, f64::NAN, 0.4, f64::INFINITY, 0.0, 1.0];
        let profile = model.profile().clone();
        let mut last_position = 0.0;

        for i in 0..3000 {
            model.update(FIXED_DT, inputs[i % inputs.len()]);
            let s = model.state();
            assert!(s.velocity >= 0.0);
            assert!(s.rpm >= profile.engine.idle_rpm && s.rpm <= profile.engine.redline);
            assert!((0.0..=1.0).contains(&s.throttle));
            assert!((0.0..=1.0).contains(&s.wheel_slip));
            assert!(s.current_gear >= 1 && s.current_gear <= profile.gear_count());
            assert!(s.position >= last_position, "position went backwards");
            last_position = s.position;
        }
    }

    #[test]
    fn test_non_positive_dt_is_a_noop() {
        let mut model = rookie();
        run(&mut model, 30, 1.0);
        let before = model.state();
        model.update(0.0, 1.0);
        model.update(-1.0, 1.0);
        model.update(f64::NAN, 1.0);
        assert_eq!(model.state(), before);
    }

    #[test]
    fn test_auto_transmission_upshifts_under_load() {
        let mut model = rookie();
        run(&mut model, 20 * 60, 1.0);
        assert!(model.state().current_gear >= 2, "state: {:?}", model.state());
    }

    #[test]
    fn test_manual_transmission_never_auto_shifts() {
        let mut profile = (*presets::get("rookie-rust-bucket").unwrap()).clone();
        profile.drivetrain.transmission = Transmission::Manual;
        let mut model = PhysicsModel::new(Arc::new(profile)).unwrap();

        run(&mut model, 20 * 60, 1.0);
        assert_eq!(model.state().current_gear, 1);

        assert!(model.shift_up());
        assert!(model.shift_up());
        assert!(!model.shift_up(), "rookie has three gears");
        assert_eq!(model.state().current_gear, 3);
        assert!(model.shift_down());
        assert_eq!(model.state().current_gear, 2);
    }

    #[test]
    fn test_mud_slows_the_launch() {
        let mut clear = rookie();
        let mut mud = rookie();
        mud.set_weather(WeatherType::Mud.condition());

        run(&mut clear, 300, 1.0);
        run(&mut mud, 300, 1.0);
        assert!(mud.position() < clear.position());
    }

    #[test]
    fn test_serialize_roundtrip_is_lossless() {
        let mut model = rookie();
        for i in 0..777 {
            model.update(FIXED_DT, if i % 3 == 0 { 0.35 } else { 1.0 });
        }
        let json = model.serialize().unwrap();

        let mut copy = rookie();
        copy.deserialize(&json).unwrap();
        assert_eq!(copy.state(), model.state());

        // And the copy keeps evolving identically
        model.update(FIXED_DT, 1.0);
        copy.update(FIXED_DT, 1.0);
        assert_eq!(copy.state(), model.state());
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        let mut model = rookie();
        assert!(model.deserialize("{not json").is_err());
        assert_eq!(model.state(), VehicleState::at_rest(model.profile()));
    }

    #[test]
    fn test_restore_clamps_invariants() {
        let mut model = rookie();
        model.restore(VehicleState {
            position: 5.0,
            velocity: -2.0,
            rpm: 99_999.0,
            throttle: 4.0,
            wheel_slip: -1.0,
            current_gear: 9,
        });
        let s = model.state();
        assert_eq!(s.velocity, 0.0);
        assert_eq!(s.rpm, 2200.0);
        assert_eq!(s.throttle, 1.0);
        assert_eq!(s.wheel_slip, 0.0);
        assert_eq!(s.current_gear, 3);
    }

    #[test]
    fn test_rebase_without_drivetrain_fields_derives_rpm() {
        let mut model = rookie();
        let json = r#"{
            "playerId": "p", "username": "p", "position": 40.0, "velocity": 3.0,
            "throttle": 0.5, "timestamp": 0.0, "inputSequence": 9
        }"#;
        let baseline: PlayerState = serde_json::from_str(json).unwrap();
        model.rebase(&baseline);

        let s = model.state();
        assert_eq!(s.position, 40.0);
        assert_eq!(s.velocity, 3.0);
        assert_eq!(s.current_gear, 1);
        // 3 m/s on 0.85 m tyres through 12 * 4
        let expected = 3.0 / 0.85 * 48.0 * 60.0 / (2.0 * std::f64::consts::PI);
        assert!((s.rpm - expected).abs() < 1e-9);
    }

    #[test]
    fn test_profile_validation() {
        let mut profile = (*presets::get("rookie-rust-bucket").unwrap()).clone();
        assert!(profile.validate().is_ok());
        profile.drivetrain.gear_ratios.clear();
        assert!(profile.validate().is_err());

        let mut profile = (*presets::get("rookie-rust-bucket").unwrap()).clone();
        profile.mass = 0.0;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_model_rejects_gearless_profile() {
        let mut profile = (*presets::get("rookie-rust-bucket").unwrap()).clone();
        profile.drivetrain.gear_ratios.clear();
        assert_eq!(profile.gear_ratio(1), 1.0);

        let err = PhysicsModel::new(Arc::new(profile)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidProfile(_)));
    }
}
