//! Local input sampling
//!
//! Raw device events are folded into one binary throttle: any held
//! accelerate key, a pressed mouse button or an active touch gives 1.0.

use std::collections::BTreeSet;

/// Key codes that accelerate
pub const THROTTLE_KEYS: [&str; 3] = ["Space", "KeyW", "ArrowUp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(String),
    KeyUp(String),
    MouseDown,
    MouseUp,
    TouchStart,
    TouchEnd,
}

#[derive(Debug, Default)]
pub struct InputSampler {
    keys: BTreeSet<String>,
    mouse_down: bool,
    touch_active: bool,
    throttle: f64,
    detached: bool,
}

impl InputSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: InputEvent) {
        if self.detached {
            return;
        }
        match event {
            InputEvent::KeyDown(code) => {
                self.keys.insert(code);
            }
            InputEvent::KeyUp(code) => {
                self.keys.remove(&code);
            }
            InputEvent::MouseDown => self.mouse_down = true,
            InputEvent::MouseUp => self.mouse_down = false,
            InputEvent::TouchStart => self.touch_active = true,
            InputEvent::TouchEnd => self.touch_active = false,
        }
        self.update_throttle();
    }

    fn update_throttle(&mut self) {
        let key_held = THROTTLE_KEYS.iter().any(|k| self.keys.contains(*k));
        self.throttle = if key_held || self.mouse_down || self.touch_active {
            1.0
        } else {
            0.0
        };
    }

    pub fn throttle(&self) -> f64 {
        self.throttle
    }

    pub fn is_accelerating(&self) -> bool {
        self.throttle > 0.0
    }

    /// Release every source and ignore further events
    pub fn detach(&mut self) {
        self.keys.clear();
        self.mouse_down = false;
        self.touch_active = false;
        self.throttle = 0.0;
        self.detached = true;
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }
}
