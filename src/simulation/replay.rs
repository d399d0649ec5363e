use crate::env::{Simulator, SimulatorStep};
use crate::error::SimulatorError;
use crate::spaces::Space;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Recorded simulator session: spaces, the reset observation and every
/// step that followed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub observation_space: Space,
    pub action_space: Space,
    pub reset: Vec<f64>,
    pub steps: Vec<SimulatorStep>,
}

impl Trace {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let trace: Trace = serde_json::from_str(&content)?;
        if trace.reset.len() != trace.observation_space.flat_dim() {
            anyhow::bail!(
                "trace reset observation has {} values, space needs {}",
                trace.reset.len(),
                trace.observation_space.flat_dim()
            );
        }
        Ok(trace)
    }
}

/// Plays a trace back; every reset rewinds to the first step. Actions are
/// checked for length and otherwise ignored.
pub struct TraceSimulator {
    trace: Arc<Trace>,
    cursor: Option<usize>,
}

impl TraceSimulator {
    pub fn new(trace: Arc<Trace>) -> Self {
        Self { trace, cursor: None }
    }
}

impl Simulator for TraceSimulator {
    fn observation_space(&self) -> Space {
        self.trace.observation_space.clone()
    }

    fn action_space(&self) -> Space {
        self.trace.action_space.clone()
    }

    fn reset(&mut self) -> Result<Vec<f64>, SimulatorError> {
        self.cursor = Some(0);
        Ok(self.trace.reset.clone())
    }

    fn step(&mut self, action: &[f64]) -> Result<SimulatorStep, SimulatorError> {
        let cursor = self
            .cursor
            .ok_or_else(|| SimulatorError::new("step called before reset"))?;

        let expected = self.trace.action_space.flat_dim();
        if action.len() != expected {
            return Err(SimulatorError::new(format!(
                "action has {} values, expected {}",
                action.len(),
                expected
            )));
        }

        let step = self
            .trace
            .steps
            .get(cursor)
            .cloned()
            .ok_or_else(|| SimulatorError::new(format!("trace exhausted after {} steps", cursor)))?;
        self.cursor = Some(cursor + 1);
        Ok(step)
    }

    fn close(&mut self) -> Result<(), SimulatorError> {
        self.cursor = None;
        Ok(())
    }
}
