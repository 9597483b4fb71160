//! Autonomous bot controller
//!
//! A target-speed controller with a fixed personality and a little throttle
//! jitter. The agent only reads speed and slip from its entity; the engine
//! feeds its throttle into the entity's physics model.

use crate::physics::VehicleState;
use crate::units::{MetersPerSecond, Percentage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Personality {
    Aggressive,
    Balanced,
    Cautious,
}

impl Personality {
    /// 30% aggressive, 40% balanced, 30% cautious
    fn draw(rng: &mut impl Rng) -> Self {
        let roll: f64 = rng.random();
        if roll < 0.3 {
            Personality::Aggressive
        } else if roll < 0.7 {
            Personality::Balanced
        } else {
            Personality::Cautious
        }
    }

    /// Target speed band in km/h
    pub fn speed_band(&self) -> (f64, f64) {
        match self {
            Personality::Aggressive => (25.0, 30.0),
            Personality::Balanced => (20.0, 25.0),
            Personality::Cautious => (15.0, 20.0),
        }
    }
}

const OVERSPEED_FACTOR: f64 = 1.1;
const CAUTIOUS_SLIP_LIMIT: f64 = 0.3;
const CAUTIOUS_CUT: f64 = 0.7;
const JITTER: f64 = 0.05;

#[derive(Debug, Clone)]
pub struct AutonomousAgent {
    personality: Personality,
    /// km/h
    target_speed: f64,
    throttle: f64,
    rng: StdRng,
}

impl AutonomousAgent {
    /// Draw a personality and target speed, then fork a private RNG for jitter
    pub fn new(rng: &mut impl Rng) -> Self {
        let personality = Personality::draw(rng);
        let (lo, hi) = personality.speed_band();
        let target_speed = rng.random_range(lo..hi);
        Self {
            personality,
            target_speed,
            throttle: 0.0,
            rng: StdRng::seed_from_u64(rng.random()),
        }
    }

    pub fn with_personality(personality: Personality, target_speed: f64, seed: u64) -> Self {
        Self {
            personality,
            target_speed,
            throttle: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn update(&mut self, vehicle: &VehicleState) {
        let speed = MetersPerSecond(vehicle.velocity).to_kph().0;

        let mut throttle = if speed < self.target_speed {
            1.0
        } else if speed > self.target_speed * OVERSPEED_FACTOR {
            0.5
        } else {
            0.8
        };

        if self.personality == Personality::Cautious && vehicle.wheel_slip > CAUTIOUS_SLIP_LIMIT {
            throttle *= CAUTIOUS_CUT;
        }

        throttle += self.rng.random_range(-JITTER..=JITTER);
        self.throttle = Percentage::new(throttle).0;
    }

    pub fn throttle(&self) -> f64 {
        self.throttle
    }

    pub fn personality(&self) -> Personality {
        self.personality
    }

    pub fn target_speed(&self) -> f64 {
        self.target_speed
    }
}
