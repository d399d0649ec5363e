pub mod env;
pub mod error;
pub mod metrics;
pub mod reward;
pub mod simulation;
pub mod spaces;
pub mod telemetry;
pub mod topology;

pub use env::{MultiAgentEnv, Simulator};
pub use error::{EnvError, Result, SimulatorError};
pub use metrics::{EpisodeAggregator, EpisodeMetrics};
pub use reward::RewardMode;
pub use simulation::{EnvConfig, Simulation};

pub mod prelude {
    pub use crate::env::{Dones, MultiAgentEnv, MultiAgentStep, Simulator, SimulatorStep, StepInfo};
    pub use crate::error::{EnvError, SimulatorError};
    pub use crate::metrics::{EpisodeAggregator, EpisodeMetrics, Reduction, ReductionTable};
    pub use crate::reward::{RewardMode, compute_rewards};
    pub use crate::simulation::{EnvConfig, Runner, Simulation, Trace, TraceSimulator};
    pub use crate::spaces::{ObservationRecord, Space, flatten_actions, split_observations};
    pub use crate::telemetry::{TelemetryParser, TelemetryRecord, TelemetrySchema};
    pub use crate::topology::{Graph, TopologyLoader, TopologyRegistry};
}
