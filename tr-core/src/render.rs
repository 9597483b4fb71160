//! Renderer capability
//!
//! The simulation only ever talks to `dyn Renderer`; concrete backends are
//! picked by a factory at startup.

use crate::model::PlayerId;
use anyhow::Result;
use serde::Serialize;

/// One entity as it should be drawn this frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityView {
    pub player_id: PlayerId,
    /// Interpolated between the previous and current tick
    pub position: f64,
    /// Wheel rotation since the previous frame (radians)
    pub wheel_rotation: f64,
    pub speed_kph: f64,
    pub finished: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderFrame {
    /// Fraction of a fixed step left in the accumulator, in [0, 1)
    pub alpha: f64,
    /// Wall-clock seconds since the previous frame
    pub delta_time: f64,
    pub tick: u64,
    pub entities: Vec<EntityView>,
}

pub trait Renderer: Send {
    fn name(&self) -> &str;

    fn add_entity(&mut self, id: &str) -> Result<()>;

    fn remove_entity(&mut self, id: &str);

    fn render(&mut self, frame: &RenderFrame) -> Result<()>;

    /// Release resources. Safe to call more than once.
    fn destroy(&mut self);
}
