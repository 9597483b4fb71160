//! Renderer backends and factory

use crate::config::RendererKind;
use anyhow::{anyhow, bail, Result};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use tr_core::render::{RenderFrame, Renderer};
use tracing::{debug, info, warn};

/// Logs every frame through `tracing`
pub struct TracingRenderer {
    entities: BTreeSet<String>,
    frames: u64,
}

impl TracingRenderer {
    /// Fails when no subscriber would ever see the output
    pub fn new() -> Result<Self> {
        if !tracing::dispatcher::has_been_set() {
            bail!("no tracing subscriber installed");
        }
        Ok(Self {
            entities: BTreeSet::new(),
            frames: 0,
        })
    }
}

impl Renderer for TracingRenderer {
    fn name(&self) -> &str {
        "tracing"
    }

    fn add_entity(&mut self, id: &str) -> Result<()> {
        self.entities.insert(id.to_string());
        info!("Render: tractor {} enters the track", id);
        Ok(())
    }

    fn remove_entity(&mut self, id: &str) {
        if self.entities.remove(id) {
            info!("Render: tractor {} leaves the track", id);
        }
    }

    fn render(&mut self, frame: &RenderFrame) -> Result<()> {
        self.frames += 1;
        let summary: Vec<String> = frame
            .entities
            .iter()
            .map(|e| format!("{}@{:.1}m/{:.1}kph", e.player_id, e.position, e.speed_kph))
            .collect();
        debug!(
            "Frame {} tick {} alpha {:.2}: {}",
            self.frames,
            frame.tick,
            frame.alpha,
            summary.join(" ")
        );
        Ok(())
    }

    fn destroy(&mut self) {
        self.entities.clear();
    }
}

const HEADLESS_FRAME_LIMIT: usize = 600;

/// Shared view of the frames a headless renderer produced
pub type FrameLog = Arc<Mutex<VecDeque<RenderFrame>>>;

/// Keeps the most recent frames in memory
pub struct HeadlessRenderer {
    entities: BTreeSet<String>,
    frames: FrameLog,
    destroyed: bool,
}

impl Default for HeadlessRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self {
            entities: BTreeSet::new(),
            frames: Arc::new(Mutex::new(VecDeque::new())),
            destroyed: false,
        }
    }

    pub fn frames(&self) -> FrameLog {
        self.frames.clone()
    }

    pub fn entities(&self) -> &BTreeSet<String> {
        &self.entities
    }
}

impl Renderer for HeadlessRenderer {
    fn name(&self) -> &str {
        "headless"
    }

    fn add_entity(&mut self, id: &str) -> Result<()> {
        if self.destroyed {
            bail!("renderer destroyed");
        }
        self.entities.insert(id.to_string());
        Ok(())
    }

    fn remove_entity(&mut self, id: &str) {
        self.entities.remove(id);
    }

    fn render(&mut self, frame: &RenderFrame) -> Result<()> {
        if self.destroyed {
            bail!("renderer destroyed");
        }
        let mut frames = self.frames.lock().map_err(|_| anyhow!("frame log poisoned"))?;
        if frames.len() >= HEADLESS_FRAME_LIMIT {
            frames.pop_front();
        }
        frames.push_back(frame.clone());
        Ok(())
    }

    fn destroy(&mut self) {
        self.destroyed = true;
        self.entities.clear();
    }
}

/// Create the preferred renderer, falling back to headless
pub fn create_renderer(kind: RendererKind) -> Box<dyn Renderer> {
    match kind {
        RendererKind::Tracing => match TracingRenderer::new() {
            Ok(renderer) => Box::new(renderer),
            Err(e) => {
                warn!("Tracing renderer unavailable ({}), falling back to headless", e);
                Box::new(HeadlessRenderer::new())
            }
        },
        RendererKind::Headless => Box::new(HeadlessRenderer::new()),
    }
}
