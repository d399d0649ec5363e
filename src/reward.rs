use crate::error::{EnvError, Result};
use crate::spaces::AgentIndex;
use crate::telemetry::TelemetryRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How the simulator's reward is attributed to agents. Fixed for the
/// lifetime of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardMode {
    /// Broadcast the scalar step reward to every agent.
    #[default]
    Shared,
    /// Read `reward_<i>` for each agent out of the telemetry.
    Individual,
}

impl FromStr for RewardMode {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "indiv" | "individual" => Ok(Self::Individual),
            other => Err(EnvError::Config(format!(
                "reward mode must be either \"indiv\" or \"shared\", got {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for RewardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::Individual => write!(f, "indiv"),
        }
    }
}

impl RewardMode {
    pub fn compute(
        self,
        scalar_reward: f64,
        telemetry: &TelemetryRecord,
        n_agents: usize,
    ) -> Result<BTreeMap<AgentIndex, f64>> {
        match self {
            Self::Shared => Ok((0..n_agents).map(|i| (i, scalar_reward)).collect()),
            Self::Individual => {
                let rewards = telemetry.agent_rewards();
                // A gap here would silently bias training
                (0..n_agents)
                    .map(|i| {
                        rewards
                            .get(&i)
                            .map(|r| (i, *r))
                            .ok_or(EnvError::MissingReward(i))
                    })
                    .collect()
            }
        }
    }
}

pub fn compute_rewards(
    mode: RewardMode,
    scalar_reward: f64,
    telemetry: &TelemetryRecord,
    n_agents: usize,
) -> Result<BTreeMap<AgentIndex, f64>> {
    mode.compute(scalar_reward, telemetry, n_agents)
}
