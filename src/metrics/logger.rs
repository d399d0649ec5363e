use super::EpisodeMetrics;
use anyhow::Result;
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Serialize)]
struct MetricRow<'a> {
    worker: usize,
    episode: usize,
    metric: &'a str,
    value: f64,
}

/// Long-format CSV: one row per metric, since the metric set varies with
/// the agent count and the telemetry keys.
pub struct MetricsLogger {
    writer: Writer<File>,
}

impl MetricsLogger {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let writer = Writer::from_path(path)?;
        Ok(Self { writer })
    }

    pub fn log(&mut self, worker: usize, episode: usize, metrics: &EpisodeMetrics) -> Result<()> {
        self.write_episode(worker, episode, metrics)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn log_batch<'a, I>(&mut self, worker: usize, episodes: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a EpisodeMetrics>,
    {
        for (episode, metrics) in episodes.into_iter().enumerate() {
            self.write_episode(worker, episode, metrics)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn write_episode(&mut self, worker: usize, episode: usize, metrics: &EpisodeMetrics) -> Result<()> {
        for (metric, value) in metrics.iter() {
            self.writer.serialize(MetricRow {
                worker,
                episode,
                metric,
                value,
            })?;
        }
        Ok(())
    }
}
