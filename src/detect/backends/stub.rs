use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

#[derive(Clone, Debug)]
enum StubStep {
    Boxes(Vec<Detection>),
    Failure(String),
}

/// Scripted backend for tests and demos.
///
/// Each call to `detect` pops the next scripted step. Once the script runs
/// out, the fallback result (no detections unless set with `always`) repeats.
#[derive(Default)]
pub struct StubBackend {
    script: VecDeque<StubStep>,
    fallback: Vec<Detection>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that reports the same boxes on every frame.
    pub fn always(detections: Vec<Detection>) -> Self {
        Self {
            fallback: detections,
            ..Self::default()
        }
    }

    /// Queue the result for the next unscripted frame.
    pub fn push(mut self, detections: Vec<Detection>) -> Self {
        self.script.push_back(StubStep::Boxes(detections));
        self
    }

    /// Queue the same result for `frames` consecutive frames.
    pub fn repeat(mut self, detections: Vec<Detection>, frames: usize) -> Self {
        for _ in 0..frames {
            self.script.push_back(StubStep::Boxes(detections.clone()));
        }
        self
    }

    /// Queue a detector failure for the next unscripted frame.
    pub fn push_failure(mut self, message: &str) -> Self {
        self.script.push_back(StubStep::Failure(message.to_string()));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(StubStep::Boxes(boxes)) => Ok(boxes),
            Some(StubStep::Failure(message)) => Err(anyhow!("stub detector failure: {}", message)),
            None => Ok(self.fallback.clone()),
        }
    }
}
