//! Fixed-step scheduling
//!
//! `FixedStepClock` turns irregular frame timestamps into a whole number of
//! fixed simulation ticks plus an interpolation factor. `drive` runs an
//! engine from a tokio interval until cancelled.

use crate::engine::GameEngine;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Work to do for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTicks {
    pub ticks: u32,
    /// Leftover fraction of a step, in [0, 1)
    pub alpha: f64,
    /// Seconds since the previous frame
    pub delta_time: f64,
}

#[derive(Debug, Clone)]
pub struct FixedStepClock {
    fixed_step: f64,
    max_catch_up_ticks: u32,
    accumulator: f64,
    last_time: Option<f64>,
}

impl FixedStepClock {
    pub fn new(fixed_step: f64, max_catch_up_ticks: u32) -> Self {
        Self {
            fixed_step,
            max_catch_up_ticks: max_catch_up_ticks.max(1),
            accumulator: 0.0,
            last_time: None,
        }
    }

    pub fn fixed_step(&self) -> f64 {
        self.fixed_step
    }

    pub fn accumulator(&self) -> f64 {
        self.accumulator
    }

    /// Forget the previous frame; the next `advance` only sets the baseline
    pub fn reset(&mut self) {
        self.accumulator = 0.0;
        self.last_time = None;
    }

    /// Feed a frame timestamp (seconds)
    pub fn advance(&mut self, now: f64) -> FrameTicks {
        let delta = match self.last_time {
            Some(last) => now - last,
            None => 0.0,
        };
        self.last_time = Some(now);
        self.accumulate(delta)
    }

    /// Feed an elapsed interval directly
    pub fn accumulate(&mut self, delta_time: f64) -> FrameTicks {
        let delta_time = if delta_time.is_finite() { delta_time.max(0.0) } else { 0.0 };
        self.accumulator += delta_time;

        let mut ticks = 0;
        while self.accumulator >= self.fixed_step && ticks < self.max_catch_up_ticks {
            self.accumulator -= self.fixed_step;
            ticks += 1;
        }

        if self.accumulator >= self.fixed_step {
            let skipped = (self.accumulator / self.fixed_step).floor();
            warn!(
                "Simulation fell behind: discarding {} ticks after running {}",
                skipped, ticks
            );
            self.accumulator %= self.fixed_step;
        }

        FrameTicks {
            ticks,
            alpha: self.accumulator / self.fixed_step,
            delta_time,
        }
    }
}

/// Run `engine` on a fixed frame interval until `cancel` fires or the engine is destroyed
pub async fn drive(engine: Arc<Mutex<GameEngine>>, frame_interval: Duration, cancel: CancellationToken) {
    let start = Instant::now();
    let mut frames = interval(frame_interval);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Engine driver started ({:?} frames)", frame_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = frames.tick() => {
                let mut engine = engine.lock().await;
                if engine.is_destroyed() {
                    break;
                }
                engine.frame(start.elapsed().as_secs_f64());
            }
        }
    }
    info!("Engine driver stopped");
}
