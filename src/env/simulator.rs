use crate::error::SimulatorError;
use crate::spaces::Space;
use serde::{Deserialize, Serialize};

/// Raw outcome of one simulator step, before any per-agent split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorStep {
    pub observation: Vec<f64>,
    pub reward: f64,
    pub done: bool,
    pub info: String,
}

/// Single-stream simulator the adapter drives. One instance per adapter.
///
/// Agents are identified by their position in the observation and action
/// vectors, so an implementation must keep flow order stable for the whole
/// episode.
pub trait Simulator: Send {
    /// Multi-agent observation space, `[n_agents, width]` or flat.
    fn observation_space(&self) -> Space;

    /// Multi-agent action space, a tuple with one entry per agent or a
    /// `[n_agents, width]` box.
    fn action_space(&self) -> Space;

    fn reset(&mut self) -> Result<Vec<f64>, SimulatorError>;

    fn step(&mut self, action: &[f64]) -> Result<SimulatorStep, SimulatorError>;

    fn close(&mut self) -> Result<(), SimulatorError> {
        Ok(())
    }
}

impl<S: Simulator + ?Sized> Simulator for Box<S> {
    fn observation_space(&self) -> Space {
        (**self).observation_space()
    }

    fn action_space(&self) -> Space {
        (**self).action_space()
    }

    fn reset(&mut self) -> Result<Vec<f64>, SimulatorError> {
        (**self).reset()
    }

    fn step(&mut self, action: &[f64]) -> Result<SimulatorStep, SimulatorError> {
        (**self).step(action)
    }

    fn close(&mut self) -> Result<(), SimulatorError> {
        (**self).close()
    }
}
