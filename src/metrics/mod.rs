pub mod logger;

use crate::error::{EnvError, Result};
use crate::spaces::AgentIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Common field holding the centralized-critic state, never aggregated.
pub const STATE_FIELD: &str = "state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reduction {
    Sum,
    Mean,
    Min,
    Max,
    Last,
}

impl Reduction {
    pub fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let reduced = match self {
            Reduction::Sum => values.iter().sum(),
            Reduction::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Reduction::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Reduction::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Reduction::Last => values[values.len() - 1],
        };
        Some(reduced)
    }
}

/// Maps metric names to reductions. First rule whose pattern is a
/// substring of the metric name wins, otherwise `fallback`.
#[derive(Debug, Clone)]
pub struct ReductionTable {
    rules: Vec<(String, Reduction)>,
    fallback: Reduction,
}

impl ReductionTable {
    pub fn new(fallback: Reduction) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    pub fn with_rule(mut self, pattern: impl Into<String>, reduction: Reduction) -> Self {
        self.rules.push((pattern.into(), reduction));
        self
    }

    pub fn reduction_for(&self, metric: &str) -> Reduction {
        self.rules
            .iter()
            .find(|(pattern, _)| metric.contains(pattern.as_str()))
            .map(|(_, r)| *r)
            .unwrap_or(self.fallback)
    }
}

impl Default for ReductionTable {
    // Averaging a rate over steps is only an approximation of the episode
    // loss rate, kept for comparability with earlier runs.
    fn default() -> Self {
        Self::new(Reduction::Sum).with_rule("loss_rate", Reduction::Mean)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeMetrics(BTreeMap<String, f64>);

impl EpisodeMetrics {
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.0.get(metric).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn into_inner(self) -> BTreeMap<String, f64> {
        self.0
    }
}

/// Episode-scoped telemetry accumulator. Values live only between
/// `on_episode_start` and `on_episode_end`.
#[derive(Debug, Clone, Default)]
pub struct EpisodeAggregator {
    series: Option<BTreeMap<String, Vec<f64>>>,
    reductions: ReductionTable,
}

impl EpisodeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reductions(reductions: ReductionTable) -> Self {
        Self {
            series: None,
            reductions,
        }
    }

    pub fn is_active(&self) -> bool {
        self.series.is_some()
    }

    /// Number of samples recorded so far for one series.
    pub fn samples(&self, key: &str) -> usize {
        self.series
            .as_ref()
            .and_then(|s| s.get(key))
            .map_or(0, Vec::len)
    }

    pub fn on_episode_start(&mut self) {
        self.series = Some(BTreeMap::new());
    }

    /// Drop whatever the current episode recorded without reducing it.
    pub fn discard(&mut self) {
        self.series = None;
    }

    pub fn on_step<'a, A, C>(&mut self, per_agent: A, common: C) -> Result<()>
    where
        A: IntoIterator<Item = (AgentIndex, BTreeMap<String, f64>)>,
        C: IntoIterator<Item = (&'a str, f64)>,
    {
        let series = self.series.as_mut().ok_or(EnvError::EpisodeNotStarted)?;

        for (agent, fields) in per_agent {
            for (name, value) in fields {
                if name == STATE_FIELD {
                    continue;
                }
                series
                    .entry(format!("{}_{}", name, agent))
                    .or_default()
                    .push(value);
            }
        }

        for (name, value) in common {
            if name == STATE_FIELD {
                continue;
            }
            series.entry(name.to_string()).or_default().push(value);
        }

        Ok(())
    }

    /// Reduce every series to one value and drop the accumulator.
    pub fn on_episode_end(&mut self) -> Result<EpisodeMetrics> {
        let series = self.series.take().ok_or(EnvError::EmptyEpisode)?;

        let metrics: BTreeMap<String, f64> = series
            .into_iter()
            .filter_map(|(name, values)| {
                let reduced = self.reductions.reduction_for(&name).apply(&values)?;
                Some((name, reduced))
            })
            .collect();

        if metrics.is_empty() {
            return Err(EnvError::EmptyEpisode);
        }

        Ok(EpisodeMetrics(metrics))
    }
}
