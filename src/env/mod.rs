//! Multi-agent view over a single-stream simulator.
//!
//! `MultiAgentEnv` owns one simulator. Every step it flattens the per-agent
//! actions into the simulator's action vector, then splits the returned
//! observation back into per-agent rows, decodes the telemetry line and
//! attributes rewards. It also feeds the episode aggregator, so episode
//! metrics come out of the same object that produced the transitions.

mod info;
mod simulator;

pub use info::{ALL_AGENTS_KEY, CommonInfo, Dones, MultiAgentStep, StepInfo};
pub use simulator::{Simulator, SimulatorStep};

use crate::error::{EnvError, Result};
use crate::metrics::{EpisodeAggregator, EpisodeMetrics};
use crate::reward::RewardMode;
use crate::simulation::EnvConfig;
use crate::spaces::{
    ActionValue, AgentIndex, ObservationRecord, Space, flatten_actions, split_observations,
};
use crate::telemetry::{TelemetryParser, TelemetrySchema};
use crate::topology::{Graph, TopologyLoader};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Closed,
}

pub struct MultiAgentEnv<S: Simulator> {
    sim: Option<S>,
    config: EnvConfig,
    reward_mode: RewardMode,
    graph: Graph,
    n_agents: usize,
    obs_width: usize,
    action_width: usize,
    observation_space: Space,
    action_space: Space,
    parser: TelemetryParser,
    aggregator: EpisodeAggregator,
    phase: Phase,
}

impl<S: Simulator> MultiAgentEnv<S> {
    pub fn new(config: EnvConfig, sim: S, topology: &dyn TopologyLoader) -> Result<Self> {
        Self::with_parts(
            config,
            sim,
            topology,
            TelemetrySchema::default(),
            EpisodeAggregator::new(),
        )
    }

    pub fn with_parts(
        config: EnvConfig,
        sim: S,
        topology: &dyn TopologyLoader,
        schema: TelemetrySchema,
        aggregator: EpisodeAggregator,
    ) -> Result<Self> {
        config.validate()?;
        let reward_mode = config.reward_mode()?;

        let (graph, n_agents) = topology.load(&config.topology)?;
        let (observation_space, obs_width) =
            sim.observation_space().per_agent_observation(n_agents)?;
        let (action_space, action_width) = sim.action_space().per_agent_action(n_agents)?;

        let env = Self {
            sim: Some(sim),
            parser: TelemetryParser::new(schema, config.debug),
            config,
            reward_mode,
            graph,
            n_agents,
            obs_width,
            action_width,
            observation_space,
            action_space,
            aggregator,
            phase: Phase::Created,
        };
        env.lifecycle("start");
        Ok(env)
    }

    pub fn n_agents(&self) -> usize {
        self.n_agents
    }

    pub fn agents(&self) -> std::ops::Range<AgentIndex> {
        0..self.n_agents
    }

    pub fn reward_mode(&self) -> RewardMode {
        self.reward_mode
    }

    pub fn worker_index(&self) -> usize {
        self.config.worker_index
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Single-agent observation space.
    pub fn observation_space(&self) -> &Space {
        &self.observation_space
    }

    /// Single-agent action space.
    pub fn action_space(&self) -> &Space {
        &self.action_space
    }

    pub fn aggregator(&self) -> &EpisodeAggregator {
        &self.aggregator
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn reset(&mut self) -> Result<BTreeMap<AgentIndex, ObservationRecord>> {
        if self.sim.is_none() {
            return Err(EnvError::Closed);
        }
        self.lifecycle("reset");

        // the previous episode is over even if the simulator fails to restart
        self.phase = Phase::Created;
        self.aggregator.discard();

        let sim = self.sim.as_mut().ok_or(EnvError::Closed)?;
        let flat = sim.reset()?;
        let observations = split_observations(&flat, self.n_agents, self.obs_width)?;

        self.aggregator.on_episode_start();
        self.phase = Phase::Running;
        Ok(observations)
    }

    pub fn step(&mut self, actions: &BTreeMap<AgentIndex, ActionValue>) -> Result<MultiAgentStep> {
        match self.phase {
            Phase::Closed => return Err(EnvError::Closed),
            Phase::Created => return Err(EnvError::NotReset),
            Phase::Running => {}
        }

        let action = flatten_actions(actions, self.n_agents, self.action_width)?;
        let sim = self.sim.as_mut().ok_or(EnvError::Closed)?;
        let raw = match sim.step(&action) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(worker = self.config.worker_index, "Simulator step failed: {}", e);
                self.phase = Phase::Created;
                return Err(e.into());
            }
        };

        let observations = split_observations(&raw.observation, self.n_agents, self.obs_width)?;
        let telemetry = self.parser.parse(&raw.info)?;
        let rewards = self.reward_mode.compute(raw.reward, &telemetry, self.n_agents)?;

        let common = CommonInfo {
            fields: telemetry.common_fields().clone(),
            state: raw.observation,
        };
        let infos: BTreeMap<AgentIndex, StepInfo> = observations
            .iter()
            .map(|(&i, obs)| {
                let own_reward = match self.reward_mode {
                    RewardMode::Individual => rewards.get(&i).copied(),
                    RewardMode::Shared => None,
                };
                // cloned per agent so no two infos alias
                (i, StepInfo::new(obs, own_reward, common.clone()))
            })
            .collect();

        self.aggregator.on_step(
            infos.iter().map(|(&i, info)| (i, info.fields())),
            common.fields.iter().map(|(k, v)| (k.as_str(), *v)),
        )?;

        if raw.done {
            debug!(worker = self.config.worker_index, "Simulator reported done");
        }

        Ok(MultiAgentStep {
            observations,
            rewards,
            dones: Dones::uniform(raw.done, self.n_agents),
            infos,
        })
    }

    /// Close out the running episode and reduce its telemetry. The next
    /// step needs a fresh `reset`.
    pub fn take_episode_metrics(&mut self) -> Result<EpisodeMetrics> {
        if self.phase == Phase::Running {
            self.phase = Phase::Created;
        }
        self.aggregator.on_episode_end()
    }

    /// Release the simulator. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut sim) = self.sim.take() else {
            return Ok(());
        };
        self.phase = Phase::Closed;
        self.lifecycle("close");
        sim.close()?;
        Ok(())
    }

    fn lifecycle(&self, event: &str) {
        if self.config.debug {
            info!("worker {} {}", self.config.worker_index, event);
        } else {
            debug!("worker {} {}", self.config.worker_index, event);
        }
    }
}

impl<S: Simulator> Drop for MultiAgentEnv<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("worker {} failed to close simulator: {}", self.config.worker_index, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimulatorError;
    use crate::topology::TopologyRegistry;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        n_agents: usize,
        reset_obs: Vec<f64>,
        steps: VecDeque<std::result::Result<SimulatorStep, SimulatorError>>,
        actions_seen: Vec<Vec<f64>>,
        closes: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(n_agents: usize) -> Self {
            Self {
                n_agents,
                reset_obs: (0..n_agents * 4).map(|v| v as f64).collect(),
                steps: VecDeque::new(),
                actions_seen: Vec::new(),
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn then(mut self, reward: f64, done: bool, info: &str) -> Self {
            let observation = (0..self.n_agents * 4).map(|v| v as f64 * 10.0).collect();
            self.steps.push_back(Ok(SimulatorStep {
                observation,
                reward,
                done,
                info: info.to_string(),
            }));
            self
        }

        fn then_fail(mut self) -> Self {
            self.steps.push_back(Err(SimulatorError::new("connection reset")));
            self
        }
    }

    impl Simulator for Scripted {
        fn observation_space(&self) -> Space {
            Space::Box { low: 0.0, high: f64::MAX, shape: vec![self.n_agents, 4] }
        }

        fn action_space(&self) -> Space {
            Space::Tuple(vec![Space::Discrete { n: 4 }; self.n_agents])
        }

        fn reset(&mut self) -> std::result::Result<Vec<f64>, SimulatorError> {
            Ok(self.reset_obs.clone())
        }

        fn step(&mut self, action: &[f64]) -> std::result::Result<SimulatorStep, SimulatorError> {
            self.actions_seen.push(action.to_vec());
            self.steps
                .pop_front()
                .unwrap_or_else(|| Err(SimulatorError::new("script exhausted")))
        }

        fn close(&mut self) -> std::result::Result<(), SimulatorError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn actions(n: usize) -> BTreeMap<AgentIndex, ActionValue> {
        (0..n).map(|i| (i, vec![i as f64])).collect()
    }

    fn env(sim: Scripted, reward: &str) -> MultiAgentEnv<Scripted> {
        let config = EnvConfig::default().with_reward(reward);
        MultiAgentEnv::new(config, sim, &TopologyRegistry::new()).unwrap()
    }

    #[test]
    fn construction_resolves_agents_and_spaces() {
        let env = env(Scripted::new(3), "shared");
        assert_eq!(env.n_agents(), 3);
        assert_eq!(env.observation_space().shape(), vec![4]);
        assert_eq!(env.action_space(), &Space::Discrete { n: 4 });
        assert_eq!(env.graph().num_flows(), 3);
    }

    #[test]
    fn construction_rejects_bad_reward_mode() {
        let config = EnvConfig::default().with_reward("both");
        let result = MultiAgentEnv::new(config, Scripted::new(3), &TopologyRegistry::new());
        assert!(matches!(result, Err(EnvError::Config(_))));
    }

    #[test]
    fn construction_rejects_agent_count_mismatch() {
        // fim has three flows
        let result = MultiAgentEnv::new(EnvConfig::default(), Scripted::new(2), &TopologyRegistry::new());
        assert!(matches!(result, Err(EnvError::Shape { .. })));
    }

    #[test]
    fn step_before_reset_fails() {
        let mut env = env(Scripted::new(3).then(1.0, false, ""), "shared");
        assert!(matches!(env.step(&actions(3)), Err(EnvError::NotReset)));
    }

    #[test]
    fn shared_step_assembles_per_agent_views() {
        let sim = Scripted::new(3).then(2.0, false, "delay=0.5 throughput=3 reward_0=7");
        let mut env = env(sim, "shared");

        let obs = env.reset().unwrap();
        assert_eq!(obs[&1].tx_rate, 4.0);

        let step = env.step(&actions(3)).unwrap();
        assert_eq!(step.rewards, BTreeMap::from([(0, 2.0), (1, 2.0), (2, 2.0)]));
        assert!(!step.done());
        assert_eq!(step.dones.get(ALL_AGENTS_KEY), Some(false));

        let info = &step.infos[&2];
        assert_eq!(info.tx_rate, 80.0);
        assert_eq!(info.loss_rate, 110.0);
        assert_eq!(info.reward, None);
        assert_eq!(info.common.fields.len(), 2);
        assert_eq!(info.common.state.len(), 12);
        assert_eq!(step.infos[&0].common, step.infos[&1].common);

        assert_eq!(env.sim.as_ref().unwrap().actions_seen, vec![vec![0.0, 1.0, 2.0]]);
    }

    #[test]
    fn individual_rewards_come_from_telemetry() {
        let sim = Scripted::new(3).then(0.0, true, "reward_0=1.5 reward_1=-2 reward_2=0.25");
        let mut env = env(sim, "indiv");
        env.reset().unwrap();

        let step = env.step(&actions(3)).unwrap();
        assert_eq!(step.rewards[&1], -2.0);
        assert_eq!(step.infos[&2].reward, Some(0.25));
        assert!(step.done());

        let metrics = env.take_episode_metrics().unwrap();
        assert_eq!(metrics.get("reward_1"), Some(-2.0));
    }

    #[test]
    fn missing_individual_reward_fails_step() {
        let sim = Scripted::new(3).then(0.0, false, "reward_0=1 reward_2=1");
        let mut env = env(sim, "indiv");
        env.reset().unwrap();
        assert!(matches!(env.step(&actions(3)), Err(EnvError::MissingReward(1))));
    }

    #[test]
    fn incomplete_actions_never_reach_simulator() {
        let mut env = env(Scripted::new(3).then(0.0, false, ""), "shared");
        env.reset().unwrap();

        let mut partial = actions(3);
        partial.remove(&2);
        assert!(matches!(env.step(&partial), Err(EnvError::IncompleteAction(2))));
        assert!(env.sim.as_ref().unwrap().actions_seen.is_empty());
    }

    #[test]
    fn simulator_errors_propagate() {
        let mut env = env(Scripted::new(3).then_fail(), "shared");
        env.reset().unwrap();
        match env.step(&actions(3)) {
            Err(EnvError::Simulator(e)) => assert_eq!(e.to_string(), "connection reset"),
            other => panic!("unexpected {:?}", other.map(|s| s.rewards)),
        }
    }

    #[test]
    fn failed_reset_does_not_leak_previous_episode() {
        let sim = Scripted::new(3)
            .then(0.0, false, "old=1")
            .then(0.0, false, "new=2");
        let mut env = env(sim, "shared");
        env.reset().unwrap();
        env.step(&actions(3)).unwrap();

        env.sim.as_mut().unwrap().reset_obs.truncate(11);
        assert!(matches!(env.reset(), Err(EnvError::Shape { expected: 12, actual: 11, .. })));
        assert!(matches!(env.step(&actions(3)), Err(EnvError::NotReset)));
        assert!(matches!(env.take_episode_metrics(), Err(EnvError::EmptyEpisode)));

        env.sim.as_mut().unwrap().reset_obs = (0..12).map(|v| v as f64).collect();
        env.reset().unwrap();
        env.step(&actions(3)).unwrap();
        let metrics = env.take_episode_metrics().unwrap();
        assert_eq!(metrics.get("new"), Some(2.0));
        assert!(metrics.get("old").is_none());
    }

    #[test]
    fn simulator_error_ends_episode() {
        let sim = Scripted::new(3)
            .then(0.0, false, "delay=1")
            .then_fail()
            .then(0.0, false, "delay=5");
        let mut env = env(sim, "shared");
        env.reset().unwrap();
        env.step(&actions(3)).unwrap();

        assert!(matches!(env.step(&actions(3)), Err(EnvError::Simulator(_))));
        assert!(matches!(env.step(&actions(3)), Err(EnvError::NotReset)));
        assert_eq!(env.sim.as_ref().unwrap().actions_seen.len(), 2);

        // what was recorded before the failure can still be reduced
        let metrics = env.take_episode_metrics().unwrap();
        assert_eq!(metrics.get("delay"), Some(1.0));
    }

    #[test]
    fn malformed_telemetry_fails_step() {
        let mut env = env(Scripted::new(3).then(0.0, false, "delay"), "shared");
        env.reset().unwrap();
        assert!(matches!(env.step(&actions(3)), Err(EnvError::Parse { .. })));
    }

    #[test]
    fn metrics_cover_agent_and_common_fields() {
        let sim = Scripted::new(3)
            .then(1.0, false, "delay=1")
            .then(1.0, true, "delay=2");
        let mut env = env(sim, "shared");
        env.reset().unwrap();
        env.step(&actions(3)).unwrap();
        env.step(&actions(3)).unwrap();

        let metrics = env.take_episode_metrics().unwrap();
        assert_eq!(metrics.get("delay"), Some(3.0));
        assert_eq!(metrics.get("tx_rate_0"), Some(0.0));
        assert_eq!(metrics.get("tx_rate_1"), Some(80.0));
        assert_eq!(metrics.get("loss_rate_2"), Some(110.0));
        assert!(metrics.get("state").is_none());
        assert!(metrics.get("reward_0").is_none());

        // a new episode has to start with reset
        assert!(matches!(env.step(&actions(3)), Err(EnvError::NotReset)));
    }

    #[test]
    fn close_is_idempotent() {
        let sim = Scripted::new(3);
        let closes = sim.closes.clone();
        let mut env = env(sim, "shared");

        env.close().unwrap();
        env.close().unwrap();
        assert!(env.is_closed());
        assert!(matches!(env.reset(), Err(EnvError::Closed)));
        assert!(matches!(env.step(&actions(3)), Err(EnvError::Closed)));

        drop(env);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_closes_simulator() {
        let sim = Scripted::new(3);
        let closes = sim.closes.clone();
        drop(env(sim, "shared"));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
