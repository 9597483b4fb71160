//! Bounded ring of locally sent inputs awaiting acknowledgement

use std::collections::VecDeque;
use tr_core::constants::INPUT_HISTORY_CAPACITY;
use tr_core::model::InputSample;

#[derive(Debug, Clone)]
pub struct InputHistory {
    samples: VecDeque<InputSample>,
    capacity: usize,
}

impl Default for InputHistory {
    fn default() -> Self {
        Self::new(INPUT_HISTORY_CAPACITY)
    }
}

impl InputHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one when full
    pub fn push(&mut self, sample: InputSample) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Index of the first sample newer than `acked`
    pub fn first_unacked(&self, acked: u64) -> Option<usize> {
        self.samples.iter().position(|s| s.sequence > acked)
    }

    /// Samples from `start` to the newest, in sequence order
    pub fn replay_from(&self, start: usize) -> impl Iterator<Item = &InputSample> {
        self.samples.iter().skip(start)
    }

    /// Drop every sample before `start`
    pub fn trim_before(&mut self, start: usize) {
        let start = start.min(self.samples.len());
        self.samples.drain(..start);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn newest(&self) -> Option<&InputSample> {
        self.samples.back()
    }
}
