use crate::error::{EnvError, Result};
use crate::reward::RewardMode;
use crate::topology::Layout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traffic {
    /// Constant bit rate.
    Cbr,
    /// On/off modulated random arrivals.
    Random,
}

impl FromStr for Traffic {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cbr" => Ok(Self::Cbr),
            "random" => Ok(Self::Random),
            other => Err(EnvError::Config(format!("unknown traffic pattern {:?}", other))),
        }
    }
}

impl fmt::Display for Traffic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cbr => write!(f, "cbr"),
            Self::Random => write!(f, "random"),
        }
    }
}

/// Environment options, named as the simulator expects them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvConfig {
    pub worker_index: usize,
    pub topology: String,
    pub layout: Layout,
    pub graph_dir: Option<PathBuf>,
    pub step_time: f64,
    pub sim_time: Option<f64>,
    pub seed: u64,
    pub traffic: String,
    pub intensity: f64,
    pub random_flow: bool,
    pub random_intensity: bool,
    pub delay_reward_weight: f64,
    pub reward: String,
    pub debug: bool,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            worker_index: 0,
            topology: "fim".to_string(),
            layout: Layout::Link,
            graph_dir: None,
            step_time: 0.005,
            sim_time: None,
            seed: 0,
            traffic: "cbr".to_string(),
            intensity: 1.0,
            random_flow: false,
            random_intensity: false,
            delay_reward_weight: 0.0,
            reward: "shared".to_string(),
            debug: false,
        }
    }
}

impl EnvConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn with_topology(mut self, topology: impl Into<String>) -> Self {
        self.topology = topology.into();
        self
    }

    pub fn with_reward(mut self, reward: impl Into<String>) -> Self {
        self.reward = reward.into();
        self
    }

    pub fn with_worker_index(mut self, worker_index: usize) -> Self {
        self.worker_index = worker_index;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Short runs while debugging unless set explicitly.
    pub fn sim_time(&self) -> f64 {
        self.sim_time.unwrap_or(if self.debug { 1.0 } else { 20.0 })
    }

    pub fn reward_mode(&self) -> Result<RewardMode> {
        self.reward.parse()
    }

    pub fn traffic_pattern(&self) -> Result<Traffic> {
        self.traffic.parse()
    }

    pub fn validate(&self) -> Result<()> {
        self.reward_mode()?;
        self.traffic_pattern()?;
        if !(self.step_time > 0.0) {
            return Err(EnvError::Config(format!(
                "stepTime must be positive, got {}",
                self.step_time
            )));
        }
        if self.sim_time() < self.step_time {
            return Err(EnvError::Config(format!(
                "simTime {} is shorter than one step",
                self.sim_time()
            )));
        }
        Ok(())
    }

    /// Command line handed to a process-launching simulator.
    pub fn sim_args(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("--simTime", self.sim_time().to_string()),
            ("--stepTime", self.step_time.to_string()),
            ("--topology", self.topology.clone()),
            ("--traffic", self.traffic.clone()),
            ("--intensity", self.intensity.to_string()),
            ("--algorithm", "rl".to_string()),
            ("--randomFlow", self.random_flow.to_string()),
            ("--randomIntensity", self.random_intensity.to_string()),
            ("--delayRewardWeight", self.delay_reward_weight.to_string()),
            ("--RC_mode", "true".to_string()),
            ("--debug", self.debug.to_string()),
        ])
    }
}
