pub mod config;
pub mod replay;

pub use config::{EnvConfig, Traffic};
pub use replay::{Trace, TraceSimulator};

use crate::env::{MultiAgentEnv, Simulator};
use crate::metrics::EpisodeMetrics;
use crate::spaces::{ActionValue, AgentIndex};
use crate::topology::TopologyRegistry;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub worker: usize,
    pub episode: usize,
    pub steps: usize,
    pub metrics: EpisodeMetrics,
}

/// Drives one environment with uniformly random actions.
pub struct Runner<S: Simulator> {
    env: MultiAgentEnv<S>,
    rng: StdRng,
    max_steps: usize,
}

impl<S: Simulator> Runner<S> {
    pub fn new(env: MultiAgentEnv<S>) -> Self {
        let config = env.config();
        let rng = StdRng::seed_from_u64(config.seed.wrapping_add(config.worker_index as u64));
        // the simulator runs simTime / stepTime steps at most
        let max_steps = (config.sim_time() / config.step_time).ceil().max(1.0) as usize;
        Self { env, rng, max_steps }
    }

    pub fn env(&self) -> &MultiAgentEnv<S> {
        &self.env
    }

    fn sample_actions(&mut self) -> BTreeMap<AgentIndex, ActionValue> {
        let space = self.env.action_space().clone();
        self.env
            .agents()
            .map(|i| (i, space.sample(&mut self.rng)))
            .collect()
    }

    /// One episode; `None` if it ended before its first step.
    pub fn run_episode(&mut self, cancel: &CancellationToken) -> crate::Result<Option<(usize, EpisodeMetrics)>> {
        self.env.reset()?;

        let mut steps = 0;
        while steps < self.max_steps && !cancel.is_cancelled() {
            let actions = self.sample_actions();
            let step = self.env.step(&actions)?;
            steps += 1;
            if step.done() {
                break;
            }
        }

        if steps == 0 {
            return Ok(None);
        }
        Ok(Some((steps, self.env.take_episode_metrics()?)))
    }

    pub fn run(
        &mut self,
        episodes: usize,
        cancel: &CancellationToken,
        pb: &ProgressBar,
    ) -> crate::Result<Vec<EpisodeReport>> {
        let worker = self.env.worker_index();
        let mut reports = Vec::with_capacity(episodes);

        for episode in 0..episodes {
            if cancel.is_cancelled() {
                info!("Worker {} cancelled after {} episodes", worker, episode);
                break;
            }
            match self.run_episode(cancel)? {
                Some((steps, metrics)) => reports.push(EpisodeReport {
                    worker,
                    episode,
                    steps,
                    metrics,
                }),
                None => warn!("Worker {} episode {} had no steps, skipped", worker, episode),
            }
            pb.inc(1);
        }

        self.env.close()?;
        Ok(reports)
    }
}

/// Replays one trace on several independent workers.
pub struct Simulation {
    config: EnvConfig,
    trace: Arc<Trace>,
    topology: Arc<TopologyRegistry>,
}

impl Simulation {
    pub fn new(config: EnvConfig, trace: Trace) -> Self {
        let mut topology = TopologyRegistry::new();
        if let Some(dir) = &config.graph_dir {
            topology = topology.with_dir(dir, config.layout);
        }
        Self {
            config,
            trace: Arc::new(trace),
            topology: Arc::new(topology),
        }
    }

    pub async fn run(&self, workers: usize, episodes: usize) -> Result<Vec<EpisodeReport>> {
        info!("Topology: {}, reward: {}", self.config.topology, self.config.reward);
        info!("Workers: {}, episodes per worker: {}", workers, episodes);

        let cancel_token = CancellationToken::new();
        let ctrl_c = cancel_token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing current episodes");
                ctrl_c.cancel();
            }
        });

        let pb = ProgressBar::new((workers * episodes) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} episodes {msg}")?
                .progress_chars("█▓░"),
        );

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let config = self.config.clone().with_worker_index(worker);
            let trace = self.trace.clone();
            let topology = self.topology.clone();
            let cancel = cancel_token.clone();
            let pb = pb.clone();

            // env calls block on the simulator, keep them off the runtime threads
            let handle = tokio::task::spawn_blocking(move || -> crate::Result<Vec<EpisodeReport>> {
                let sim = TraceSimulator::new(trace);
                let env = MultiAgentEnv::new(config, sim, &*topology)?;
                Runner::new(env).run(episodes, &cancel, &pb)
            });
            handles.push(handle);
        }

        let mut reports = Vec::new();
        for (worker, handle) in handles.into_iter().enumerate() {
            match handle.await? {
                Ok(mut worker_reports) => reports.append(&mut worker_reports),
                Err(e) => {
                    error!("Worker {} failed: {}", worker, e);
                    cancel_token.cancel();
                    pb.abandon_with_message("failed");
                    return Err(e.into());
                }
            }
        }

        pb.finish_with_message("done");
        Ok(reports)
    }
}

/// Mean of every metric over the episodes that report it.
pub fn summarize(reports: &[EpisodeReport]) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for report in reports {
        for (metric, value) in report.metrics.iter() {
            let entry = sums.entry(metric.to_string()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(metric, (sum, n))| (metric, sum / n as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::SimulatorStep;
    use crate::spaces::Space;

    fn fim_trace(steps: usize) -> Trace {
        Trace {
            observation_space: Space::Box { low: 0.0, high: 100.0, shape: vec![3, 4] },
            action_space: Space::Tuple(vec![Space::Box { low: 0.0, high: 1.0, shape: vec![1] }; 3]),
            reset: vec![0.0; 12],
            steps: (0..steps)
                .map(|i| SimulatorStep {
                    observation: vec![1.0; 12],
                    reward: 1.0,
                    done: i + 1 == steps,
                    info: format!("delay={} reward_0=1 reward_1=2 reward_2=3", i),
                })
                .collect(),
        }
    }

    fn runner(reward: &str, steps: usize) -> Runner<TraceSimulator> {
        let config = EnvConfig::default().with_reward(reward);
        let sim = TraceSimulator::new(Arc::new(fim_trace(steps)));
        Runner::new(MultiAgentEnv::new(config, sim, &TopologyRegistry::new()).unwrap())
    }

    #[test]
    fn episode_runs_until_done() {
        let mut runner = runner("indiv", 3);
        let (steps, metrics) = runner.run_episode(&CancellationToken::new()).unwrap().unwrap();
        assert_eq!(steps, 3);
        assert_eq!(metrics.get("delay"), Some(0.0 + 1.0 + 2.0));
        assert_eq!(metrics.get("reward_2"), Some(9.0));
        assert_eq!(metrics.get("tx_rate_1"), Some(3.0));
    }

    #[test]
    fn episodes_do_not_leak_into_each_other() {
        let mut runner = runner("shared", 2);
        let pb = ProgressBar::hidden();
        let reports = runner.run(3, &CancellationToken::new(), &pb).unwrap();

        assert_eq!(reports.len(), 3);
        for r in &reports {
            assert_eq!(r.steps, 2);
            assert_eq!(r.metrics.get("delay"), Some(1.0));
        }
        assert!(runner.env().is_closed());
    }

    #[test]
    fn cancelled_before_start_yields_nothing() {
        let mut runner = runner("shared", 2);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(runner.run(2, &cancel, &ProgressBar::hidden()).unwrap().is_empty());
        assert!(runner.env().is_closed());
    }

    #[test]
    fn summarize_averages_episodes() {
        let mut runner = runner("shared", 2);
        let reports = runner
            .run(2, &CancellationToken::new(), &ProgressBar::hidden())
            .unwrap();
        let summary = summarize(&reports);
        assert_eq!(summary["delay"], 1.0);
        assert_eq!(summary["loss_rate_0"], 1.0);
    }

    #[tokio::test]
    async fn workers_run_independently() {
        let sim = Simulation::new(EnvConfig::default(), fim_trace(4));
        let reports = sim.run(3, 2).await.unwrap();
        assert_eq!(reports.len(), 6);
        let workers: std::collections::BTreeSet<_> = reports.iter().map(|r| r.worker).collect();
        assert_eq!(workers.len(), 3);
        assert!(reports.iter().all(|r| r.metrics.get("delay") == Some(6.0)));
    }
}
