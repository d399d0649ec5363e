// Copyright 2025 Servus Altissimi (Pseudonym)

// Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the "Software"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions:
// The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software.
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

use csmarl::metrics::logger::MetricsLogger;
use csmarl::simulation::{self, EnvConfig, EpisodeReport, Simulation, Trace};
use csmarl::telemetry::{TelemetryParser, TelemetrySchema};
use csmarl::topology::{TopologyLoader, TopologyRegistry};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded simulator trace through the multi-agent adapter
    Run {
        #[arg(long)]
        trace: PathBuf,
        /// JSON file with environment options
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        topology: Option<String>,
        /// indiv or shared
        #[arg(short, long)]
        reward: Option<String>,
        #[arg(short, long, default_value_t = 10)]
        episodes: usize,
        #[arg(short, long, default_value_t = 1)]
        workers: usize,
        #[arg(short, long, default_value = "results")]
        output: PathBuf,
        #[arg(long)]
        debug: bool,
    },

    /// Decode one telemetry line
    Parse {
        line: String,
    },

    /// List built-in topologies
    Topologies,
}

#[tokio::main]
async fn main() -> Result<()> {
    let program_start = Instant::now();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            trace,
            config,
            topology,
            reward,
            episodes,
            workers,
            output,
            debug,
        } => {
            let mut env_config = match config {
                Some(path) => EnvConfig::from_json_file(path)?,
                None => EnvConfig::default(),
            };
            if let Some(topology) = topology {
                env_config = env_config.with_topology(topology);
            }
            if let Some(reward) = reward {
                env_config = env_config.with_reward(reward);
            }
            if debug {
                env_config = env_config.with_debug(true);
            }

            run_replay(env_config, trace, episodes, workers.max(1), output).await?;
        }

        Commands::Parse { line } => {
            let parser = TelemetryParser::new(TelemetrySchema::default(), true);
            let record = parser.parse(&line)?;

            println!("\nCommon fields");
            for (key, value) in record.common_fields() {
                println!("  {:<20} {}", key, value);
            }
            println!("\nAgent rewards");
            for (agent, value) in record.agent_rewards() {
                println!("  {:<20} {}", agent, value);
            }
            println!();
        }

        Commands::Topologies => {
            let registry = TopologyRegistry::new();

            println!("\nBuilt-in Topologies");
            for name in registry.list() {
                let (graph, agents) = registry.load(&name)?;
                println!(
                    "  - {:<10} {} agents, {} nodes, {} edges",
                    name,
                    agents,
                    graph.num_nodes(),
                    graph.edges.len()
                );
            }
            println!();
        }
    }

    info!("Total runtime: {:.2}s", program_start.elapsed().as_secs_f64());

    Ok(())
}

async fn run_replay(
    config: EnvConfig,
    trace_path: PathBuf,
    episodes: usize,
    workers: usize,
    output: PathBuf,
) -> Result<()> {
    info!("Loading trace: {}", trace_path.display());
    let trace = Trace::from_json_file(&trace_path)?;

    if config.debug {
        for (arg, value) in config.sim_args() {
            info!("  {}={}", arg, value);
        }
    }

    let sim = Simulation::new(config.clone(), trace);
    let reports = sim.run(workers, episodes).await?;

    if reports.is_empty() {
        info!("No complete episodes.");
        return Ok(());
    }

    let summary = simulation::summarize(&reports);
    summary_table(&summary, reports.len());
    save_results(&config, &reports, &summary, &output)?;

    Ok(())
}

fn save_results(
    config: &EnvConfig,
    reports: &[EpisodeReport],
    summary: &BTreeMap<String, f64>,
    output: &Path,
) -> Result<()> {
    std::fs::create_dir_all(output)?;
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let name = format!("{}_{}", config.topology, config.reward);

    let csv_path = output.join(format!("{}_{}.csv", name, timestamp));
    let mut logger = MetricsLogger::new(&csv_path)?;
    for report in reports {
        logger.log(report.worker, report.episode, &report.metrics)?;
    }
    info!("Episode metrics saved to: {}", csv_path.display());

    let json_path = output.join(format!("{}_{}_summary.json", name, timestamp));
    std::fs::write(
        &json_path,
        serde_json::to_string_pretty(&serde_json::json!({
            "config": config,
            "episodes": reports,
            "mean": summary,
        }))?,
    )?;
    info!("Summary saved to: {}", json_path.display());

    Ok(())
}

fn summary_table(summary: &BTreeMap<String, f64>, episodes: usize) {
    println!("\n╔══════════════════════════════╦════════════════╗");
    println!("║ Metric (mean of {:>4} eps)    ║ Value          ║", episodes);
    println!("╠══════════════════════════════╬════════════════╣");

    for (metric, value) in summary {
        println!("║ {:<28} ║ {:>14.4} ║", metric, value);
    }

    println!("╚══════════════════════════════╩════════════════╝\n");
}
