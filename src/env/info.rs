use crate::spaces::{AgentIndex, ObservationRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key under which multi-agent drivers expect the episode-wide done flag.
pub const ALL_AGENTS_KEY: &str = "__all__";

/// Step data shared by every agent. Each agent receives its own copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommonInfo {
    /// Non-reward telemetry fields.
    pub fields: BTreeMap<String, f64>,
    /// Raw flat observation, for centralized critics.
    pub state: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub tx_rate: f64,
    pub tx_rate_ewma: f64,
    pub latency: f64,
    pub loss_rate: f64,
    /// Own reward, only in individual reward mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    pub common: CommonInfo,
}

impl StepInfo {
    pub fn new(observation: &ObservationRecord, reward: Option<f64>, common: CommonInfo) -> Self {
        Self {
            tx_rate: observation.tx_rate,
            tx_rate_ewma: observation.tx_rate_ewma,
            latency: observation.latency,
            loss_rate: observation.loss_rate,
            reward,
            common,
        }
    }

    /// Per-agent scalars tracked across an episode (everything but `common`).
    pub fn fields(&self) -> BTreeMap<String, f64> {
        let mut fields = BTreeMap::from([
            ("tx_rate".to_string(), self.tx_rate),
            ("tx_rate_ewma".to_string(), self.tx_rate_ewma),
            ("latency".to_string(), self.latency),
            ("loss_rate".to_string(), self.loss_rate),
        ]);
        if let Some(reward) = self.reward {
            fields.insert("reward".to_string(), reward);
        }
        fields
    }
}

/// Termination flags. Termination is uniform: the simulator reports one
/// done flag and it is copied to every agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dones {
    pub all: bool,
    pub agents: BTreeMap<AgentIndex, bool>,
}

impl Dones {
    pub fn uniform(done: bool, n_agents: usize) -> Self {
        Self {
            all: done,
            agents: (0..n_agents).map(|i| (i, done)).collect(),
        }
    }

    /// Lookup by driver key: `"__all__"` or an agent index.
    pub fn get(&self, key: &str) -> Option<bool> {
        if key == ALL_AGENTS_KEY {
            return Some(self.all);
        }
        key.parse::<AgentIndex>()
            .ok()
            .and_then(|i| self.agents.get(&i).copied())
    }
}

#[derive(Debug, Clone)]
pub struct MultiAgentStep {
    pub observations: BTreeMap<AgentIndex, ObservationRecord>,
    pub rewards: BTreeMap<AgentIndex, f64>,
    pub dones: Dones,
    pub infos: BTreeMap<AgentIndex, StepInfo>,
}

impl MultiAgentStep {
    pub fn done(&self) -> bool {
        self.dones.all
    }
}
